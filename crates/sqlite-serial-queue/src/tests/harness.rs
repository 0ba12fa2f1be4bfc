//! Shared fixtures.

use crate::{Database, DatabaseQueue, DbResult, Params, QueueOptions};

pub(crate) const PERSONS_SQL: &str =
    "CREATE TABLE Persons (id INTEGER PRIMARY KEY,name TEXT UNIQUE NOT NULL,age INTEGER)";

pub(crate) fn memory_queue() -> DatabaseQueue {
    DatabaseQueue::in_memory(QueueOptions::default()).unwrap()
}

pub(crate) fn persons_queue() -> DatabaseQueue {
    let queue = memory_queue();
    queue
        .submit(|db| {
            db.execute(PERSONS_SQL, ())?;
            Ok(())
        })
        .unwrap();
    queue
}

pub(crate) fn persons_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute(PERSONS_SQL, ()).unwrap();
    db
}

pub(crate) fn insert_person(db: &Database, name: &str, age: i64) -> DbResult<usize> {
    db.execute(
        "INSERT INTO Persons (name, age) VALUES (?, ?)",
        Params::Positional(vec![name.into(), age.into()]),
    )
}

pub(crate) fn count_persons(queue: &DatabaseQueue) -> i64 {
    queue
        .submit(|db| db.query_i64("SELECT count(*) FROM Persons", ()))
        .unwrap()
        .unwrap_or(0)
}
