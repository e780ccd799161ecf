// Integration tests for transaction outcomes and scheduling

pub mod common;

use assert_matches::assert_matches;
use common::{book, memory_factory, seeded_library};
use netabase_idb::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_done_resolves_after_every_request() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;
    let log = Rc::new(RefCell::new(Vec::new()));

    let put = {
        let log = log.clone();
        let request = store.put(book("0765326353", "The Way of Kings", "Brandon Sanderson", 2010));
        async move {
            let key = request.await;
            log.borrow_mut().push("put");
            key
        }
    };
    let count = {
        let log = log.clone();
        let request = store.count(Query::All);
        async move {
            let count = request.await;
            log.borrow_mut().push("count");
            count
        }
    };
    let done = {
        let log = log.clone();
        let done = tx.done();
        async move {
            let done = done.await;
            log.borrow_mut().push("done");
            done
        }
    };

    // Poll the outcome first so it would win any race with the requests
    let (done, put, count) = factory.run_until(async { futures::join!(done, put, count) })?;
    done?;
    assert_eq!(put?, Key::from("0765326353"));
    assert_eq!(count?, 5);
    assert_eq!(*log.borrow(), vec!["put", "count", "done"]);
    Ok(())
}

#[test]
fn test_outcome_is_shared_by_every_done_future() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;
    let _ = store.get("0441013597");

    let (first, second) = factory.run_until(async { futures::join!(tx.done(), tx.done()) })?;
    first?;
    second?;
    // Awaiting after the fact sees the same outcome
    factory.run_until(tx.done())?
}

#[test]
fn test_explicit_abort_rejects_pending_requests() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;

    let (put, done) = factory.run_until(async {
        let put = store.put(book("0441013597", "Dune (abridged)", "Frank Herbert", 1965));
        tx.abort()?;
        Ok::<_, NetabaseError>(futures::join!(put, tx.done()))
    })??;

    assert_matches!(put, Err(error) if error.kind() == Some(ErrorKind::AbortError));
    assert_matches!(
        done,
        Err(NetabaseError::TransactionAborted(error)) if error.kind == ErrorKind::AbortError
    );
    assert_eq!(tx.error(), None, "An explicit abort leaves no transaction error");
    assert_matches!(tx.abort(), Err(error) if error.kind() == Some(ErrorKind::InvalidStateError));

    // VERIFY: nothing was written
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let dune = factory.run_until(tx.object_store("books")?.get("0441013597"))??;
    assert_eq!(
        dune.and_then(|book| book.get("title").cloned()),
        Some(Value::from("Dune"))
    );
    Ok(())
}

#[test]
fn test_explicit_commit() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;

    let (put, done) = factory.run_until(async {
        let put = store.put(book("0765326353", "The Way of Kings", "Brandon Sanderson", 2010));
        tx.commit()?;
        Ok::<_, NetabaseError>(futures::join!(put, tx.done()))
    })??;
    assert!(put.is_ok());
    done?;

    let late = factory.run_until(store.count(Query::All))?;
    assert_matches!(late, Err(error) if error.kind() == Some(ErrorKind::TransactionInactiveError));
    Ok(())
}

#[test]
fn test_overlapping_writers_run_in_creation_order() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let first = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let second = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let (writer, reader) = (first.object_store("books")?, second.object_store("books")?);
    let log = Rc::new(RefCell::new(Vec::new()));

    let write = {
        let log = log.clone();
        let request = writer.put(book("0441013597", "Dune (2nd ed.)", "Frank Herbert", 1965));
        async move {
            request.await?;
            log.borrow_mut().push("write");
            Ok::<_, NetabaseError>(())
        }
    };
    let read = {
        let log = log.clone();
        let request = reader.get("0441013597");
        async move {
            let book = request.await?;
            log.borrow_mut().push("read");
            Ok::<_, NetabaseError>(book)
        }
    };

    let (read, write) = factory.run_until(async { futures::join!(read, write) })?;
    write?;
    let title = read?.and_then(|book| book.get("title").cloned());

    // VERIFY: the second transaction waited for the first to commit
    assert_eq!(*log.borrow(), vec!["write", "read"]);
    assert_eq!(title, Some(Value::from("Dune (2nd ed.)")));

    factory.run_until(async {
        first.done().await?;
        second.done().await
    })?
}

#[test]
fn test_readers_do_not_wait_for_each_other() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let first = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let second = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let (a, b) = (first.object_store("books")?, second.object_store("books")?);
    let log = Rc::new(RefCell::new(Vec::new()));

    let reads = [("a1", &a), ("b1", &b), ("a2", &a), ("b2", &b)].map(|(name, store)| {
        let log = log.clone();
        let request = store.count(Query::All);
        async move {
            let count = request.await?;
            log.borrow_mut().push(name);
            Ok::<_, NetabaseError>(count)
        }
    });
    let counts = factory.run_until(futures::future::join_all(reads))?;

    for count in counts {
        assert_eq!(count?, 4);
    }
    // VERIFY: the two read-only transactions interleaved
    assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    Ok(())
}
