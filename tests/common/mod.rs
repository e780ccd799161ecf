// Common test utilities and helpers
#![allow(dead_code)]

use netabase_idb::prelude::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh memory store with logging wired to the test harness
pub fn memory_factory() -> MemoryFactory {
    init_logging();
    MemoryFactory::new()
}

pub fn book(isbn: &str, title: &str, author: &str, year: u32) -> Value {
    Value::object([
        ("isbn", Value::from(isbn)),
        ("title", Value::from(title)),
        ("author", Value::from(author)),
        ("year", Value::from(year)),
    ])
}

/// Version 1: a `books` store keyed by ISBN with an author index
pub fn library_v1() -> Vec<Migration> {
    vec![Migration::new(|tx| {
        let books = tx.db().create_object_store(
            "books",
            ObjectStoreParameters::builder().key_path("isbn").build(),
        )?;
        books.create_index("by_author", "author", IndexParameters::default())?;
        Ok(())
    })]
}

/// Version 2: adds a `loans` store with generated keys
pub fn library_v2() -> Vec<Migration> {
    let mut migrations = library_v1();
    migrations.push(Migration::new(|tx| {
        tx.db().create_object_store(
            "loans",
            ObjectStoreParameters::builder()
                .key_path("id")
                .auto_increment(true)
                .build(),
        )?;
        Ok(())
    }));
    migrations
}

pub fn open_library(
    factory: &MemoryFactory,
    migrations: Vec<Migration>,
) -> NetabaseResult<Database> {
    factory.run_until(open_database(factory, "library", migrations, None))?
}

pub fn sample_books() -> Vec<Value> {
    vec![
        book("0441013597", "Dune", "Frank Herbert", 1965),
        book("0441172717", "Dune Messiah", "Frank Herbert", 1969),
        book("0441478123", "The Left Hand of Darkness", "Ursula K. Le Guin", 1969),
        book("0553293354", "Foundation", "Isaac Asimov", 1951),
    ]
}

/// Put `books` in one read-write transaction and wait for it to commit
pub fn seed_books(factory: &MemoryFactory, db: &Database, books: &[Value]) -> NetabaseResult<()> {
    let tx = db.transaction(["books"], TransactionMode::ReadWrite)?;
    let store = tx.object_store("books")?;
    for book in books {
        let _ = store.put(book.clone());
    }
    factory.run_until(tx.done())?
}

/// A seeded library at version 1
pub fn seeded_library(factory: &MemoryFactory) -> NetabaseResult<Database> {
    let db = open_library(factory, library_v1())?;
    seed_books(factory, &db, &sample_books())?;
    Ok(db)
}
