//! Single-shot requests as futures.

use super::completion::InFlight;
use super::cursor::CursorStream;
use super::rebind::take_cursor_mark;
use super::subscription::ListenerGroup;
use super::Wrap;
use crate::error::{ErrorKind, NetabaseError, NetabaseResult, StoreError};
use crate::handles::{Cursor, Database};
use crate::traits::{DatabaseInfo, EventKind, ListenerOptions, RawRequest, RawResult};
use crate::types::{Key, ReadyState, Value};
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use log::warn;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// Typed view of a request result. Handles in the result are wrapped on the way out.
pub trait FromRawResult: Sized + 'static {
    const EXPECTED: &'static str;

    fn from_raw(result: RawResult) -> NetabaseResult<Self>;
}

fn unexpected<T: FromRawResult>(found: &RawResult) -> NetabaseError {
    NetabaseError::UnexpectedResult {
        expected: T::EXPECTED,
        found: found.kind_name(),
    }
}

impl FromRawResult for RawResult {
    const EXPECTED: &'static str = "any result";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        Ok(result)
    }
}

impl FromRawResult for () {
    const EXPECTED: &'static str = "Undefined";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Undefined => Ok(()),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Option<Value> {
    const EXPECTED: &'static str = "Value";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Undefined => Ok(None),
            RawResult::Value(value) => Ok(Some(value)),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Key {
    const EXPECTED: &'static str = "Key";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Key(key) => Ok(key),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Option<Key> {
    const EXPECTED: &'static str = "Key";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Undefined => Ok(None),
            RawResult::Key(key) => Ok(Some(key)),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for u64 {
    const EXPECTED: &'static str = "Count";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Count(count) => Ok(count),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Vec<Value> {
    const EXPECTED: &'static str = "Values";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Values(values) => Ok(values),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Vec<Key> {
    const EXPECTED: &'static str = "Keys";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Keys(keys) => Ok(keys),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Vec<DatabaseInfo> {
    const EXPECTED: &'static str = "Databases";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Databases(databases) => Ok(databases),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Option<Cursor> {
    const EXPECTED: &'static str = "Cursor";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Cursor(cursor) => Ok(cursor.wrap()),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl FromRawResult for Database {
    const EXPECTED: &'static str = "Database";

    fn from_raw(result: RawResult) -> NetabaseResult<Self> {
        match result {
            RawResult::Database(db) => Ok(db.wrap()),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

/// A wrapped request before the caller picks how to consume it.
pub enum Pending {
    Request(Rc<dyn RawRequest>),
    /// Issued by an operation that opens a cursor.
    CursorRequest(Rc<dyn RawRequest>),
    /// The store refused to issue the request.
    Failed(StoreError),
}

impl Pending {
    pub(crate) fn from_request(request: Rc<dyn RawRequest>) -> Self {
        if take_cursor_mark(request.handle_id()) {
            Pending::CursorRequest(request)
        } else {
            Pending::Request(request)
        }
    }

    pub fn request(&self) -> Option<Rc<dyn RawRequest>> {
        match self {
            Pending::Request(request) | Pending::CursorRequest(request) => Some(request.clone()),
            Pending::Failed(_) => None,
        }
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self, Pending::CursorRequest(_))
    }

    /// Await the request's single result as `T`.
    pub fn into_future<T: FromRawResult>(self) -> RequestFuture<T> {
        match self {
            Pending::Request(request) | Pending::CursorRequest(request) => {
                RequestFuture::new(request)
            }
            Pending::Failed(error) => RequestFuture::failed(error.into()),
        }
    }

    /// Iterate the cursor the request produces.
    pub fn into_stream(self) -> CursorStream {
        match self {
            Pending::CursorRequest(request) => CursorStream::new(request),
            Pending::Request(_) => CursorStream::failed(NetabaseError::UnexpectedResult {
                expected: "cursor request",
                found: "request",
            }),
            Pending::Failed(error) => CursorStream::failed(error.into()),
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pending::Request(request) => {
                f.debug_tuple("Request").field(&request.handle_id()).finish()
            }
            Pending::CursorRequest(request) => f
                .debug_tuple("CursorRequest")
                .field(&request.handle_id())
                .finish(),
            Pending::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

struct Settle<T> {
    sender: oneshot::Sender<NetabaseResult<T>>,
    in_flight: Option<InFlight>,
}

type SettleSlot<T> = RefCell<Option<Settle<T>>>;

enum RequestState<T> {
    Ready(Option<NetabaseResult<T>>),
    Listening {
        receiver: oneshot::Receiver<NetabaseResult<T>>,
        slot: Weak<SettleSlot<T>>,
        group: Rc<ListenerGroup<dyn RawRequest>>,
    },
    Native(LocalBoxFuture<'static, NetabaseResult<T>>),
}

/// Resolves with the result of a request, or fails with the error the request reported.
///
/// The future subscribes on creation. Whichever of `success` or `error` fires first settles it
/// and removes both listeners.
#[must_use = "futures do nothing unless polled"]
pub struct RequestFuture<T> {
    state: RequestState<T>,
}

// The result is moved out on completion and never pinned.
impl<T> Unpin for RequestFuture<T> {}

impl<T: FromRawResult> RequestFuture<T> {
    pub(crate) fn new(request: Rc<dyn RawRequest>) -> Self {
        if let Some(native) = request.native_completion() {
            return Self {
                state: RequestState::Native(Box::pin(async move { T::from_raw(native.await?) })),
            };
        }

        let (sender, receiver) = oneshot::channel();
        let in_flight = match request.ready_state() {
            ReadyState::Pending => request
                .transaction()
                .and_then(|tx| InFlight::on_transaction(&*tx)),
            ReadyState::Done => None,
        };
        let slot = Rc::new(RefCell::new(Some(Settle { sender, in_flight })));
        let group = ListenerGroup::new(request.clone());

        let on_success = slot.clone();
        let source = Rc::downgrade(&request);
        group.listen(EventKind::Success, ListenerOptions::ONCE, move |_| {
            let result = match source.upgrade() {
                Some(request) => request
                    .result()
                    .map_err(NetabaseError::from)
                    .and_then(T::from_raw),
                None => Err(NetabaseError::RequestDropped),
            };
            settle(&on_success, result)
        });

        let on_error = slot.clone();
        let source = Rc::downgrade(&request);
        group.listen(EventKind::Error, ListenerOptions::ONCE, move |_| {
            let error = source
                .upgrade()
                .and_then(|request| request.error())
                .unwrap_or_else(|| StoreError::new(ErrorKind::UnknownError, "The request failed"));
            settle(&on_error, Err(error.into()))
        });

        Self {
            state: RequestState::Listening {
                receiver,
                slot: Rc::downgrade(&slot),
                group,
            },
        }
    }

    /// An already-settled future.
    pub fn ready(result: NetabaseResult<T>) -> Self {
        Self {
            state: RequestState::Ready(Some(result)),
        }
    }

    /// An already-rejected future.
    pub fn failed(error: NetabaseError) -> Self {
        Self::ready(Err(error))
    }

    /// Count this future as outstanding on its transaction, if it is not already.
    pub(crate) fn track_in_flight(&self) {
        let RequestState::Listening { slot, group, .. } = &self.state else {
            return;
        };
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let mut slot = slot.borrow_mut();
        if let Some(settle) = slot.as_mut() {
            if settle.in_flight.is_none() {
                settle.in_flight = group
                    .target()
                    .transaction()
                    .and_then(|tx| InFlight::on_transaction(&*tx));
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        match &self.state {
            RequestState::Ready(_) => true,
            RequestState::Listening { group, .. } => group.is_settled(),
            RequestState::Native(_) => false,
        }
    }
}

fn settle<T>(slot: &SettleSlot<T>, result: NetabaseResult<T>) -> bool {
    let taken = slot.borrow_mut().take();
    if let Some(settle) = taken {
        if settle.sender.send(result).is_err() {
            warn!("request settled after its future was dropped");
        }
    }
    true
}

impl<T> Future for RequestFuture<T> {
    type Output = NetabaseResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            RequestState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(NetabaseError::RequestDropped)))
            }
            RequestState::Listening { receiver, .. } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(oneshot::Canceled)) => {
                    Poll::Ready(Err(NetabaseError::RequestDropped))
                }
                Poll::Pending => Poll::Pending,
            },
            RequestState::Native(future) => future.as_mut().poll(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{
        Event, EventTarget, HandleId, Listener, ListenerId, RawIdentity, RawTransaction,
    };
    use crate::wrap::subscription::tests::TestTarget;
    use assert_matches::assert_matches;
    use futures::task::noop_waker;
    use std::cell::Cell;

    struct FakeRequest {
        id: HandleId,
        target: TestTarget,
        ready: Cell<ReadyState>,
        outcome: RefCell<Option<Result<RawResult, StoreError>>>,
    }

    impl FakeRequest {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: HandleId::next(),
                target: TestTarget::default(),
                ready: Cell::new(ReadyState::Pending),
                outcome: RefCell::new(None),
            })
        }

        fn succeed(&self, result: RawResult) {
            self.ready.set(ReadyState::Done);
            *self.outcome.borrow_mut() = Some(Ok(result));
            self.target.fire(Event::new(EventKind::Success));
        }

        fn fail(&self, error: StoreError) {
            self.ready.set(ReadyState::Done);
            *self.outcome.borrow_mut() = Some(Err(error));
            self.target.fire(Event::new(EventKind::Error));
        }
    }

    impl RawIdentity for FakeRequest {
        fn handle_id(&self) -> HandleId {
            self.id
        }
    }

    impl EventTarget for FakeRequest {
        fn add_event_listener(
            &self,
            kind: EventKind,
            listener: Listener,
            options: ListenerOptions,
        ) -> ListenerId {
            self.target.add_event_listener(kind, listener, options)
        }

        fn remove_event_listener(&self, kind: EventKind, id: ListenerId) {
            self.target.remove_event_listener(kind, id)
        }
    }

    impl RawRequest for FakeRequest {
        fn ready_state(&self) -> ReadyState {
            self.ready.get()
        }

        fn result(&self) -> Result<RawResult, StoreError> {
            match &*self.outcome.borrow() {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(_)) | None => Err(StoreError::invalid_state("no result")),
            }
        }

        fn error(&self) -> Option<StoreError> {
            match &*self.outcome.borrow() {
                Some(Err(error)) => Some(error.clone()),
                _ => None,
            }
        }

        fn transaction(&self) -> Option<Rc<dyn RawTransaction>> {
            None
        }
    }

    fn poll_now<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn test_success_resolves_with_converted_result() {
        let request = FakeRequest::new();
        let mut future = RequestFuture::<Option<Value>>::new(request.clone());
        assert!(poll_now(&mut future).is_pending());

        request.succeed(RawResult::Value(Value::from("cat")));

        assert_matches!(
            poll_now(&mut future),
            Poll::Ready(Ok(Some(Value::String(s)))) if s == "cat"
        );
        assert_eq!(request.target.listener_count(), 0);
    }

    #[test]
    fn test_error_rejects_with_store_error() {
        let request = FakeRequest::new();
        let mut future = RequestFuture::<Key>::new(request.clone());

        request.fail(StoreError::constraint("Key already exists"));

        assert_matches!(
            poll_now(&mut future),
            Poll::Ready(Err(NetabaseError::Store(StoreError {
                kind: ErrorKind::ConstraintError,
                ..
            })))
        );
        assert_eq!(request.target.listener_count(), 0);
    }

    #[test]
    fn test_mismatched_result_is_reported() {
        let request = FakeRequest::new();
        let mut future = RequestFuture::<u64>::new(request.clone());
        request.succeed(RawResult::Key(Key::from(1)));

        assert_matches!(
            poll_now(&mut future),
            Poll::Ready(Err(NetabaseError::UnexpectedResult { expected: "Count", found: "Key" }))
        );
    }

    #[test]
    fn test_dropping_future_unsubscribes() {
        let request = FakeRequest::new();
        let future = RequestFuture::<()>::new(request.clone());
        assert_eq!(request.target.listener_count(), 2);
        drop(future);
        assert_eq!(request.target.listener_count(), 0);
    }

    #[test]
    fn test_failed_issue_is_already_rejected() {
        let pending = Pending::Failed(StoreError::inactive());
        let mut future = pending.into_future::<Option<Value>>();
        assert!(future.is_settled());
        assert_matches!(
            poll_now(&mut future),
            Poll::Ready(Err(error)) if error.kind() == Some(ErrorKind::TransactionInactiveError)
        );
    }

    #[test]
    fn test_plain_request_does_not_stream() {
        let request: Rc<dyn RawRequest> = FakeRequest::new();
        let pending = Pending::from_request(request);
        assert!(!pending.is_cursor());
        assert_matches!(pending, Pending::Request(_));
    }
}
