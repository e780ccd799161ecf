//! Cursor traversal as a stream.
//!
//! A cursor request fires `success` once per position. The stream yields the wrapped cursor for
//! every position and re-arms a fresh request future on the same request before yielding, so
//! the next firing is never missed. A null cursor ends the stream.
//!
//! The caller may move the cursor itself (`continue_`, `advance`, `continue_primary_key`)
//! between items. If it has not when the next item is requested, the stream continues the
//! cursor by one.

use super::request::RequestFuture;
use super::Unwrap;
use crate::error::{NetabaseError, NetabaseResult};
use crate::handles::Cursor;
use crate::traits::RawRequest;
use crate::types::ReadyState;
use futures::stream::{FusedStream, Stream};
use log::trace;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Where a [`CursorStream`] is in its traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Waiting for the request to report the first position.
    AwaitingFirst,
    /// A cursor has been yielded and not yet moved by the stream.
    Positioned,
    /// Waiting for the request to report the next position.
    Advancing,
    /// Finished, either past the last record or after an error.
    Exhausted,
}

#[must_use = "streams do nothing unless polled"]
pub struct CursorStream {
    request: Option<Rc<dyn RawRequest>>,
    armed: Option<RequestFuture<Option<Cursor>>>,
    current: Option<Cursor>,
    failure: Option<NetabaseError>,
    state: CursorState,
}

impl CursorStream {
    pub(crate) fn new(request: Rc<dyn RawRequest>) -> Self {
        Self {
            armed: Some(RequestFuture::new(request.clone())),
            request: Some(request),
            current: None,
            failure: None,
            state: CursorState::AwaitingFirst,
        }
    }

    /// A stream that yields `error` once and then ends.
    pub(crate) fn failed(error: NetabaseError) -> Self {
        Self {
            request: None,
            armed: None,
            current: None,
            failure: Some(error),
            state: CursorState::AwaitingFirst,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    fn finish(&mut self) {
        self.state = CursorState::Exhausted;
        self.armed = None;
        self.current = None;
        self.request = None;
    }

    // Move the cursor on unless the caller already did.
    fn advance_if_idle(&mut self) -> NetabaseResult<()> {
        let (Some(request), Some(cursor)) = (&self.request, &self.current) else {
            return Ok(());
        };
        // A settled armed future means the caller's own move has already landed.
        let moved = self.armed.as_ref().is_some_and(RequestFuture::is_settled);
        if request.ready_state() == ReadyState::Done && !moved {
            trace!("advancing idle cursor on {}", request.handle_id());
            cursor.unwrap_raw().continue_(None)?;
        }
        if let Some(armed) = &self.armed {
            armed.track_in_flight();
        }
        Ok(())
    }
}

impl Stream for CursorStream {
    type Item = NetabaseResult<Cursor>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(error) = this.failure.take() {
            this.finish();
            return Poll::Ready(Some(Err(error)));
        }

        match this.state {
            CursorState::Exhausted => return Poll::Ready(None),
            CursorState::Positioned => {
                if let Err(error) = this.advance_if_idle() {
                    this.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                this.state = CursorState::Advancing;
            }
            CursorState::AwaitingFirst | CursorState::Advancing => {}
        }

        let Some(armed) = this.armed.as_mut() else {
            this.finish();
            return Poll::Ready(None);
        };

        match Pin::new(armed).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(cursor))) => {
                this.armed = this.request.clone().map(RequestFuture::new);
                this.current = Some(cursor.clone());
                this.state = CursorState::Positioned;
                Poll::Ready(Some(Ok(cursor)))
            }
            Poll::Ready(Ok(None)) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Err(error)) => {
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}

impl FusedStream for CursorStream {
    fn is_terminated(&self) -> bool {
        self.state == CursorState::Exhausted
    }
}
