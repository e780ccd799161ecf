// Integration tests for façade identity across repeated lookups

pub mod common;

use common::{memory_factory, seeded_library};
use netabase_idb::prelude::*;
use netabase_idb::wrap::{unwrap, wrap};

#[test]
fn test_repeated_lookups_return_the_same_facade() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let first = tx.object_store("books")?;
    let second = tx.object_store("books")?;
    assert_eq!(first, second, "Same store in the same transaction should be one façade");
    assert_eq!(first.wrapper_id(), second.wrapper_id());

    // VERIFY: walking back up the handle graph lands on the façades we already hold
    assert_eq!(first.transaction(), tx);
    assert_eq!(tx.db(), db);
    assert_eq!(first.index("by_author")?.object_store(), first);

    factory.run_until(tx.done())?
}

#[test]
fn test_wrap_after_unwrap_is_identity() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;
    assert_eq!(wrap(unwrap(&store)), store);
    assert_eq!(wrap(store.clone()), store, "Wrapping a façade returns it unchanged");
    assert_eq!(wrap(unwrap(&db)), db);

    factory.run_until(tx.done())?
}

#[test]
fn test_other_transactions_get_other_facades() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;

    let first = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let second = db.transaction(["books"], TransactionMode::ReadOnly)?;
    assert_ne!(first, second);
    assert_ne!(first.object_store("books")?, second.object_store("books")?);

    factory.run_until(async {
        first.done().await?;
        second.done().await
    })?
}

#[test]
fn test_cursor_is_the_same_facade_at_every_position() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let (first, second, keys) = factory.run_until(async {
        let mut cursors = store.open_cursor(Query::All);
        let first = cursors.try_next().await?.expect("first position");
        let first_key = first.primary_key();
        let second = cursors.try_next().await?.expect("second position");
        let second_key = second.primary_key();
        Ok::<_, NetabaseError>((first, second, (first_key, second_key)))
    })??;

    assert_eq!(first, second, "A traversal yields one cursor façade throughout");
    assert_eq!(keys.0, Some(Key::from("0441013597")));
    assert_eq!(keys.1, Some(Key::from("0441172717")));
    assert_eq!(first.source(), CursorSourceHandle::ObjectStore(store.clone()));

    factory.run_until(tx.done())?
}
