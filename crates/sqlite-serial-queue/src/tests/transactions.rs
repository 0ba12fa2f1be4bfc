//! Transaction scopes and savepoints.

use super::harness::{count_persons, insert_person, persons_db, persons_queue};
use crate::{DbError, TransactionKind, TxOutcome};

#[test]
fn rollback_discards_every_statement() {
    let queue = persons_queue();

    let inserted = queue
        .in_transaction(|db| {
            let a = insert_person(db, "a", 1);
            let b = insert_person(db, "b", 2);
            TxOutcome::Rollback(a.is_ok() && b.is_ok())
        })
        .unwrap();

    assert!(inserted);
    assert_eq!(count_persons(&queue), 0);
}

#[test]
fn commit_keeps_every_statement() {
    let queue = persons_queue();

    queue
        .in_immediate_transaction(|db| {
            let result = insert_person(db, "a", 1).and_then(|_| insert_person(db, "b", 2));
            TxOutcome::rollback_on_err(result)
        })
        .unwrap()
        .unwrap();

    assert_eq!(count_persons(&queue), 2);
}

#[test]
fn failure_inside_scope_rolls_back_with_rollback_on_err() {
    let queue = persons_queue();

    let result = queue
        .in_deferred_transaction(|db| {
            let result = insert_person(db, "dup", 1).and_then(|_| insert_person(db, "dup", 2));
            TxOutcome::rollback_on_err(result)
        })
        .unwrap();

    assert!(result.unwrap_err().is_constraint_violation());
    assert_eq!(count_persons(&queue), 0);
}

#[test]
fn duplicate_insert_can_still_commit_the_first_row() {
    let queue = persons_queue();

    let (first, second) = queue
        .in_exclusive_transaction(|db| {
            let first = insert_person(db, "alice", 30);
            let second = insert_person(db, "alice", 31);
            TxOutcome::Commit((first, second))
        })
        .unwrap();

    assert_eq!(first.unwrap(), 1);
    let err = second.unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(err.extended_code(), rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE);
    assert_eq!(count_persons(&queue), 1);
}

#[test]
fn rolled_back_savepoint_keeps_outer_work() {
    let queue = persons_queue();

    queue
        .in_transaction(|db| {
            let outer = insert_person(db, "A", 1);
            let inner = db.in_savepoint(|db| {
                let result = insert_person(db, "B", 2);
                TxOutcome::Rollback(result)
            });
            TxOutcome::rollback_on_err(outer.and(inner))
        })
        .unwrap()
        .unwrap()
        .unwrap();

    let names = queue
        .submit(|db| {
            let mut cursor = db.query("SELECT name FROM Persons ORDER BY name", ())?;
            let mut names = Vec::new();
            while cursor.advance()? {
                names.extend(cursor.string("name")?);
            }
            Ok(names)
        })
        .unwrap();
    assert_eq!(names, vec!["A".to_string()]);
}

#[test]
fn queue_savepoint_outside_transaction_commits_on_release() {
    let queue = persons_queue();

    queue
        .submit_savepoint(|db| TxOutcome::Commit(insert_person(db, "kept", 1)))
        .unwrap()
        .unwrap();
    queue
        .submit_savepoint(|db| TxOutcome::Rollback(insert_person(db, "dropped", 2)))
        .unwrap()
        .unwrap();

    assert_eq!(count_persons(&queue), 1);
}

#[test]
fn named_savepoints_form_a_stack() {
    let db = persons_db();
    db.begin_deferred_transaction().unwrap();

    db.start_savepoint("outer").unwrap();
    insert_person(&db, "one", 1).unwrap();
    db.start_savepoint("inner \"quoted\"").unwrap();
    insert_person(&db, "two", 2).unwrap();
    assert_eq!(db.active_savepoints().len(), 2);

    assert!(matches!(
        db.start_savepoint("outer"),
        Err(DbError::DuplicateSavepoint(_))
    ));
    assert!(db.had_error());

    db.rollback_to_savepoint("outer").unwrap();
    assert_eq!(db.active_savepoints(), ["outer".to_string()]);
    assert_eq!(db.query_i64("SELECT count(*) FROM Persons", ()).unwrap(), Some(0));

    db.release_savepoint("outer").unwrap();
    assert!(db.active_savepoints().is_empty());
    assert!(matches!(
        db.release_savepoint("outer"),
        Err(DbError::UnknownSavepoint(_))
    ));

    db.commit().unwrap();
    assert!(!db.is_in_transaction());
}

#[test]
fn failed_commit_rolls_back_and_reports() {
    let mut db = persons_db();
    db.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED);",
    )
    .unwrap();

    let err = db
        .transaction(TransactionKind::Immediate, |db| {
            TxOutcome::Commit(db.execute("INSERT INTO child (pid) VALUES (99)", ()))
        })
        .unwrap_err();

    assert!(err.is_constraint_violation());
    assert!(!db.is_in_transaction());
    assert_eq!(db.last_error_code(), rusqlite::ffi::SQLITE_CONSTRAINT);
    assert_eq!(db.query_i64("SELECT count(*) FROM child", ()).unwrap(), Some(0));
}

#[test]
fn nested_begin_fails_and_leaves_outer_open() {
    let db = persons_db();
    db.begin_transaction(TransactionKind::default()).unwrap();
    assert!(db.begin_deferred_transaction().is_err());
    assert!(db.is_in_transaction());
    db.rollback().unwrap();
}

#[test]
fn failed_savepoint_rollback_still_releases() {
    let mut db = persons_db();
    let err = db
        .in_savepoint(|db| {
            let inserted = insert_person(db, "lost", 1);
            // Ends the transaction the savepoint opened, taking the savepoint with it.
            let ended = db.execute("ROLLBACK", ());
            TxOutcome::Rollback(inserted.and(ended))
        })
        .unwrap_err();

    assert_eq!(err.code(), rusqlite::ffi::SQLITE_ERROR);
    assert!(db
        .last_error_message()
        .is_some_and(|m| m.contains("no such savepoint")));
    assert!(db.active_savepoints().is_empty());
    assert!(!db.is_in_transaction());

    db.in_savepoint(|db| TxOutcome::Commit(insert_person(db, "kept", 2)))
        .unwrap()
        .unwrap();
    assert_eq!(db.query_i64("SELECT count(*) FROM Persons", ()).unwrap(), Some(1));
}

#[test]
fn failed_savepoint_release_drops_it_from_the_stack() {
    let mut db = persons_db();
    let committed = db
        .in_savepoint(|db| {
            let inserted = insert_person(db, "early", 1);
            TxOutcome::Commit(inserted.and(db.execute("COMMIT", ())))
        })
        .unwrap_err();

    assert_eq!(committed.code(), rusqlite::ffi::SQLITE_ERROR);
    assert!(db.active_savepoints().is_empty());
    assert_eq!(db.query_i64("SELECT count(*) FROM Persons", ()).unwrap(), Some(1));
}
