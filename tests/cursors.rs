// Integration tests for cursor traversal as a stream

pub mod common;

use assert_matches::assert_matches;
use common::{
    book, library_v1, memory_factory, open_library, sample_books, seed_books, seeded_library,
};
use futures::stream::FusedStream;
use netabase_idb::prelude::*;
use netabase_idb::wrap::CursorState;
use quickcheck::quickcheck;
use rand::seq::SliceRandom;

fn numbers() -> Vec<Migration> {
    vec![Migration::new(|tx| {
        tx.db()
            .create_object_store("numbers", ObjectStoreParameters::default())?;
        Ok(())
    })]
}

/// Store `keys` out of line and read them back through a cursor
fn traverse_numbers(keys: &[u32], direction: CursorDirection) -> NetabaseResult<Vec<Key>> {
    let factory = MemoryFactory::new();
    let db = factory.run_until(open_database(&factory, "numbers", numbers(), None))??;

    let tx = db.transaction(["numbers"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("numbers")?;
    for key in keys {
        let _ = store.put_with_key(*key, *key);
    }
    factory.run_until(tx.done())??;

    let tx = db.transaction(["numbers"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("numbers")?;
    let keys: Vec<Option<Key>> = factory.run_until(
        store
            .open_cursor_with_direction(Query::All, direction)
            .map_ok(|cursor| cursor.key())
            .try_collect(),
    )??;
    Ok(keys.into_iter().flatten().collect())
}

#[test]
fn test_cursor_over_three_records_yields_three_items() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = open_library(&factory, library_v1())?;
    seed_books(&factory, &db, &sample_books()[..3])?;

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;
    let titles: Vec<Option<Value>> = factory.run_until(
        store
            .open_cursor(Query::All)
            .map_ok(|cursor| cursor.value().and_then(|book| book.get("title").cloned()))
            .try_collect(),
    )??;

    assert_eq!(
        titles,
        vec![
            Some(Value::from("Dune")),
            Some(Value::from("Dune Messiah")),
            Some(Value::from("The Left Hand of Darkness")),
        ]
    );
    factory.run_until(tx.done())?
}

#[test]
fn test_exhausted_stream_stays_done() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let mut stream = store.open_cursor(KeyRange::only("0553293354"));
    let (first, second, third) = factory.run_until(async {
        // The cursor is one object across positions, so read its key before moving on
        let first = stream
            .try_next()
            .await
            .map(|cursor| cursor.and_then(|cursor| cursor.primary_key()));
        let second = stream.try_next().await;
        let third = stream.try_next().await;
        (first, second, third)
    })?;

    assert_matches!(first, Ok(Some(key)) if key == Key::from("0553293354"));
    assert_matches!(second, Ok(None));
    assert_matches!(third, Ok(None), "A finished stream never yields again");
    assert!(stream.is_terminated());
    assert_eq!(stream.state(), CursorState::Exhausted);
    factory.run_until(tx.done())?
}

#[test]
fn test_empty_range_yields_nothing() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let found: Vec<Cursor> = factory.run_until(
        store
            .open_cursor(KeyRange::lower_bound("9", false))
            .try_collect(),
    )??;
    assert!(found.is_empty());
    factory.run_until(tx.done())?
}

#[test]
fn test_reverse_direction() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let keys: Vec<Option<Key>> = factory.run_until(
        store
            .open_key_cursor_with_direction(Query::All, CursorDirection::Prev)
            .map_ok(|cursor| cursor.primary_key())
            .try_collect(),
    )??;
    assert_eq!(
        keys,
        vec![
            Some(Key::from("0553293354")),
            Some(Key::from("0441478123")),
            Some(Key::from("0441172717")),
            Some(Key::from("0441013597")),
        ]
    );
    factory.run_until(tx.done())?
}

#[test]
fn test_key_cursor_carries_no_value() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let values: Vec<Option<Value>> = factory.run_until(
        store
            .open_key_cursor(Query::All)
            .map_ok(|cursor| cursor.value())
            .try_collect(),
    )??;
    assert_eq!(values.len(), 4);
    assert!(values.iter().all(Option::is_none));
    factory.run_until(tx.done())?
}

#[test]
fn test_unique_index_traversal_skips_duplicates() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let by_author = tx.object_store("books")?.index("by_author")?;

    let authors: Vec<(Option<Key>, Option<Key>)> = factory.run_until(
        by_author
            .open_cursor_with_direction(Query::All, CursorDirection::NextUnique)
            .map_ok(|cursor| (cursor.key(), cursor.primary_key()))
            .try_collect(),
    )??;

    assert_eq!(
        authors,
        vec![
            (Some(Key::from("Frank Herbert")), Some(Key::from("0441013597"))),
            (Some(Key::from("Isaac Asimov")), Some(Key::from("0553293354"))),
            (Some(Key::from("Ursula K. Le Guin")), Some(Key::from("0441478123"))),
        ]
    );
    factory.run_until(tx.done())?
}

#[test]
fn test_caller_moves_take_precedence_over_the_stream() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let seen = factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        let mut seen = Vec::new();
        while let Some(cursor) = stream.try_next().await? {
            seen.push(cursor.primary_key());
            if seen.len() == 1 {
                cursor.advance(2)?;
            }
        }
        Ok::<_, NetabaseError>(seen)
    })??;

    // VERIFY: the stream did not move the cursor a second time after advance(2)
    assert_eq!(
        seen,
        vec![
            Some(Key::from("0441013597")),
            Some(Key::from("0441478123")),
            Some(Key::from("0553293354")),
        ]
    );
    factory.run_until(tx.done())?
}

#[test]
fn test_continue_to_key() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let (first, jumped) = factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        let cursor = stream.try_next().await?.expect("first record");
        let first = cursor.primary_key();
        cursor.continue_(Some(Key::from("0441400000")))?;
        let jumped = stream.try_next().await?.and_then(|cursor| cursor.primary_key());
        Ok::<_, NetabaseError>((first, jumped))
    })??;

    assert_eq!(first, Some(Key::from("0441013597")));
    assert_eq!(jumped, Some(Key::from("0441478123")));
    factory.run_until(tx.done())?
}

#[test]
fn test_moving_twice_before_the_next_item_is_rejected() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let (again, backwards) = factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        let cursor = stream.try_next().await?.expect("first record");
        let backwards = cursor.continue_(Some(Key::from("0000000000")));
        cursor.continue_(None)?;
        let again = cursor.continue_(None);
        Ok::<_, NetabaseError>((again, backwards))
    })??;

    assert_matches!(backwards, Err(error) if error.kind() == Some(ErrorKind::DataError));
    assert_matches!(again, Err(error) if error.kind() == Some(ErrorKind::InvalidStateError));
    factory.run_until(tx.done())?
}

#[test]
fn test_cursor_update_rewrites_records() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;

    factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        while let Some(cursor) = stream.try_next().await? {
            let Some(Value::Object(mut fields)) = cursor.value() else {
                continue;
            };
            let title = fields
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .unwrap_or_default();
            fields.insert("title".to_string(), Value::from(title.as_str()));
            cursor.update(Value::Object(fields)).await?;
        }
        Ok::<_, NetabaseError>(())
    })??;
    factory.run_until(tx.done())??;

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let books = factory.run_until(tx.object_store("books")?.get_all(Query::All, None))??;
    let titles: Vec<&str> = books
        .iter()
        .filter_map(|book| book.get("title").and_then(Value::as_str))
        .collect();
    assert_eq!(
        titles,
        vec!["DUNE", "DUNE MESSIAH", "THE LEFT HAND OF DARKNESS", "FOUNDATION"]
    );
    Ok(())
}

#[test]
fn test_cursor_update_must_keep_the_key() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;

    let result = factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        let cursor = stream.try_next().await?.expect("first record");
        cursor
            .update(book("0000000000", "Moved", "Nobody", 2000))
            .await
    })?;
    assert_matches!(result, Err(error) if error.kind() == Some(ErrorKind::DataError));
    factory.run_until(tx.done())?
}

#[test]
fn test_index_cursor_delete() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let by_author = tx.object_store("books")?.index("by_author")?;

    let deleted = factory.run_until(async {
        let mut stream = by_author.open_cursor("Frank Herbert");
        let mut deleted = 0;
        while let Some(cursor) = stream.try_next().await? {
            cursor.delete().await?;
            deleted += 1;
        }
        Ok::<_, NetabaseError>(deleted)
    })??;
    factory.run_until(tx.done())??;
    assert_eq!(deleted, 2);

    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let remaining = factory.run_until(tx.object_store("books")?.get_all_keys(Query::All, None))??;
    assert_eq!(
        remaining,
        vec![Key::from("0441478123"), Key::from("0553293354")]
    );
    Ok(())
}

#[test]
fn test_key_cursor_cannot_modify() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;

    let result = factory.run_until(async {
        let mut stream = store.open_key_cursor(Query::All);
        let cursor = stream.try_next().await?.expect("first record");
        cursor.delete().await
    })?;
    assert_matches!(result, Err(error) if error.kind() == Some(ErrorKind::InvalidStateError));
    factory.run_until(tx.done())?
}

#[test]
fn test_shuffled_inserts_come_back_in_reverse_order() -> NetabaseResult<()> {
    let mut keys: Vec<u32> = (0..50).collect();
    keys.shuffle(&mut rand::thread_rng());

    let found = traverse_numbers(&keys, CursorDirection::Prev)?;
    let expected: Vec<Key> = (0..50u32).rev().map(Key::from).collect();
    assert_eq!(found, expected);
    Ok(())
}

quickcheck! {
    fn prop_cursor_yields_each_key_once_in_order(keys: Vec<u32>) -> bool {
        let mut expected = keys.clone();
        expected.sort_unstable();
        expected.dedup();
        let expected: Vec<Key> = expected.into_iter().map(Key::from).collect();
        traverse_numbers(&keys, CursorDirection::Next).ok() == Some(expected)
    }
}

#[test]
fn test_continue_primary_key_on_an_index_cursor() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;
    let index = store.index("by_author")?;

    let (positions, on_store) = factory.run_until(async {
        let mut stream = index.open_cursor(Query::All);
        let mut positions = Vec::new();
        let cursor = stream.try_next().await?.expect("first entry");
        positions.push((cursor.key(), cursor.primary_key()));
        cursor.continue_primary_key("Frank Herbert", "0441100000")?;
        let cursor = stream.try_next().await?.expect("second entry");
        positions.push((cursor.key(), cursor.primary_key()));
        cursor.continue_primary_key("Isaac Asimov", "0000000000")?;
        let cursor = stream.try_next().await?.expect("third entry");
        positions.push((cursor.key(), cursor.primary_key()));

        let mut records = store.open_cursor(Query::All);
        let record = records.try_next().await?.expect("first record");
        let on_store = record.continue_primary_key("0441013597", "0441013597");
        Ok::<_, NetabaseError>((positions, on_store))
    })??;

    assert_eq!(
        positions,
        vec![
            (Some(Key::from("Frank Herbert")), Some(Key::from("0441013597"))),
            (Some(Key::from("Frank Herbert")), Some(Key::from("0441172717"))),
            (Some(Key::from("Isaac Asimov")), Some(Key::from("0553293354"))),
        ]
    );
    assert_matches!(on_store, Err(e) if e.kind() == Some(ErrorKind::InvalidAccessError));
    factory.run_until(tx.done())?
}

#[test]
fn test_caller_continue_then_other_work_yields_every_record_once() -> NetabaseResult<()> {
    let factory = memory_factory();
    let db = seeded_library(&factory)?;
    let tx = db.transaction(["books"], TransactionMode::ReadOnly)?;
    let store = tx.object_store("books")?;

    let seen = factory.run_until(async {
        let mut stream = store.open_cursor(Query::All);
        let mut seen = Vec::new();
        while let Some(cursor) = stream.try_next().await? {
            seen.push(cursor.primary_key());
            cursor.continue_(None)?;
            // The continue lands while this request is outstanding
            store.count(Query::All).await?;
        }
        Ok::<_, NetabaseError>(seen)
    })??;

    // VERIFY: the stream did not continue a cursor the caller had already moved
    assert_eq!(
        seen,
        vec![
            Some(Key::from("0441013597")),
            Some(Key::from("0441172717")),
            Some(Key::from("0441478123")),
            Some(Key::from("0553293354")),
        ]
    );
    factory.run_until(tx.done())?
}
