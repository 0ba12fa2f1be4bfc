//! Statement cache through the connection.

use super::harness::{insert_person, persons_db, PERSONS_SQL};
use crate::{Database, DatabasePath, DatabaseSettings, Params, TxOutcome, Value};

const SELECT_ADULTS: &str = "SELECT name FROM Persons WHERE age >= ? ORDER BY name";

fn cached_db() -> Database {
    cached_db_with_capacity(DatabaseSettings::default().statement_cache_capacity)
}

fn cached_db_with_capacity(capacity: usize) -> Database {
    let settings = DatabaseSettings {
        cache_statements: true,
        statement_cache_capacity: capacity,
        ..DatabaseSettings::default()
    };
    let mut db = Database::new(DatabasePath::Memory, settings);
    db.open().unwrap();
    db.execute(PERSONS_SQL, ()).unwrap();
    db
}

fn workload(db: &Database) -> Vec<Vec<String>> {
    for (i, name) in ["zed", "amy", "kim", "bo"].iter().enumerate() {
        insert_person(db, name, 15 + 5 * i as i64).unwrap();
    }
    let mut results = Vec::new();
    for min_age in [0_i64, 20, 30] {
        let mut cursor = db.query(SELECT_ADULTS, Params::positional([min_age])).unwrap();
        let mut names = Vec::new();
        while cursor.advance().unwrap() {
            names.extend(cursor.string(0).unwrap());
        }
        results.push(names);
    }
    results
}

#[test]
fn cached_and_uncached_results_match() {
    let plain = persons_db();
    let cached = cached_db();

    assert_eq!(workload(&plain), workload(&cached));
    plain.with_statement_cache(|cache| assert!(cache.is_empty()));
    cached.with_statement_cache(|cache| assert_eq!(cache.use_count(SELECT_ADULTS), 3));
}

#[test]
fn open_cursor_keeps_its_statement_to_itself() {
    let db = cached_db();
    insert_person(&db, "amy", 30).unwrap();

    let mut first = db.query(SELECT_ADULTS, Params::positional([0])).unwrap();
    let mut second = db.query(SELECT_ADULTS, Params::positional([0])).unwrap();
    db.with_statement_cache(|cache| {
        assert_eq!(cache.entries(SELECT_ADULTS).len(), 2);
        assert_eq!(cache.in_use(SELECT_ADULTS), 2);
    });

    assert!(first.advance().unwrap());
    assert!(second.advance().unwrap());
    assert_eq!(first.string(0).unwrap(), second.string(0).unwrap());

    first.close();
    second.close();
    db.with_statement_cache(|cache| {
        assert_eq!(cache.in_use(SELECT_ADULTS), 0);
        assert_eq!(cache.entries(SELECT_ADULTS).len(), 1);
    });

    let _third = db.query(SELECT_ADULTS, Params::positional([0])).unwrap();
    db.with_statement_cache(|cache| {
        assert_eq!(cache.entries(SELECT_ADULTS).len(), 1);
        assert_eq!(cache.in_use(SELECT_ADULTS), 1);
    });
}

#[test]
fn execute_releases_immediately() {
    let db = cached_db();
    let sql = "INSERT INTO Persons (name, age) VALUES (?, ?)";
    for i in 0..5_i64 {
        db.execute(sql, vec![Value::from(format!("n{i}")), Value::from(i)])
            .unwrap();
    }
    db.with_statement_cache(|cache| {
        assert_eq!(cache.entries(sql).len(), 1);
        assert_eq!(cache.use_count(sql), 5);
        assert_eq!(cache.in_use(sql), 0);
    });
}

#[test]
fn failed_execution_releases_its_lease() {
    let db = cached_db();
    let sql = "INSERT INTO Persons (name, age) VALUES (?, ?)";
    db.execute(sql, vec![Value::from("x"), Value::from(1)]).unwrap();
    assert!(db.execute(sql, vec![Value::from("x"), Value::from(1)]).is_err());
    db.with_statement_cache(|cache| assert_eq!(cache.in_use(sql), 0));
}

#[test]
fn disabling_or_closing_empties_the_cache() {
    let mut db = cached_db();
    db.query_i64("SELECT count(*) FROM Persons", ()).unwrap();
    db.with_statement_cache(|cache| assert!(!cache.is_empty()));

    db.set_should_cache_statements(false);
    assert!(!db.should_cache_statements());
    db.with_statement_cache(|cache| assert!(cache.is_empty()));

    db.query_i64("SELECT count(*) FROM Persons", ()).unwrap();
    db.with_statement_cache(|cache| assert!(cache.is_empty()));

    db.set_should_cache_statements(true);
    db.query_i64("SELECT count(*) FROM Persons", ()).unwrap();
    db.close().unwrap();
    db.with_statement_cache(|cache| assert!(cache.is_empty()));
}

#[test]
fn idle_statements_stay_within_capacity() {
    let mut db = cached_db_with_capacity(4);
    for n in 0..40_i64 {
        db.query_i64(&format!("SELECT {n}"), ()).unwrap();
        db.with_statement_cache(|cache| assert!(cache.len() <= 4));
    }
    db.with_statement_cache(|cache| {
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.entries("SELECT 39").len(), 1);
        assert!(cache.entries("SELECT 0").is_empty());
    });

    db.set_statement_cache_capacity(1);
    db.with_statement_cache(|cache| assert_eq!(cache.len(), 1));
}

#[test]
fn savepoint_statements_bypass_the_cache() {
    let mut db = cached_db();
    db.clear_cached_statements();
    for i in 0..500_i64 {
        db.in_savepoint(|db| {
            let outcome = insert_person(db, &format!("p{i}"), i);
            if i % 2 == 0 {
                TxOutcome::Commit(outcome)
            } else {
                TxOutcome::Rollback(outcome)
            }
        })
        .unwrap()
        .unwrap();
    }
    db.with_statement_cache(|cache| {
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.use_count("INSERT INTO Persons (name, age) VALUES (?, ?)"), 500);
    });
    assert_eq!(db.query_i64("SELECT count(*) FROM Persons", ()).unwrap(), Some(250));
}
