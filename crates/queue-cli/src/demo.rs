//! Persons walkthrough: concurrent writers, a rolled-back transaction and a
//! rolled-back savepoint, all on a private in-memory database.

use std::error::Error;
use std::thread;

use queue_config_and_utils::Config;
use sqlite_serial_queue::{DatabaseQueue, DbResult, TxOutcome, Value};
use tracing::{info, warn};

use crate::app::queue_options;

const PERSONS_SQL: &str =
    "CREATE TABLE Persons (id INTEGER PRIMARY KEY,name TEXT UNIQUE NOT NULL,age INTEGER)";
const INSERT_SQL: &str = "INSERT INTO Persons (name,age) VALUES (? , ?)";
const PER_THREAD: usize = 5;

pub fn run(config: &Config, threads: usize) -> Result<(), Box<dyn Error>> {
    let queue = DatabaseQueue::in_memory(queue_options(config))?;
    let created = queue.submit(|db| db.create_table("Persons", PERSONS_SQL))?;
    info!(created, "Persons table ready");

    let writers: Vec<_> = (0..threads)
        .map(|t| {
            let queue = queue.clone();
            thread::spawn(move || -> DbResult<()> {
                for i in 0..PER_THREAD {
                    let name = format!("person-{t}-{i}");
                    let age = (18 + t * PER_THREAD + i) as i64;
                    queue.submit(move |db| {
                        db.execute(INSERT_SQL, vec![Value::from(name), Value::from(age)])
                    })?;
                }
                Ok(())
            })
        })
        .collect();
    for writer in writers {
        match writer.join() {
            Ok(result) => result?,
            Err(_) => return Err("writer thread panicked".into()),
        }
    }
    let after_writers = count(&queue)?;
    println!("{threads} writer(s) inserted {after_writers} row(s)");

    // A unique-name clash inside a transaction rolls back the whole unit.
    let clash = queue.in_transaction(|db| {
        let result = db
            .execute(INSERT_SQL, vec![Value::from("temp"), Value::from(1)])
            .and_then(|_| db.execute(INSERT_SQL, vec![Value::from("temp"), Value::from(2)]));
        TxOutcome::rollback_on_err(result)
    })?;
    if let Err(err) = clash {
        warn!(error = %err, "Transaction rolled back");
    }
    println!("after rolled-back transaction: {} row(s)", count(&queue)?);

    // Keep the outer insert, drop the one made inside the savepoint.
    queue.in_transaction(|db| {
        let outer = db.execute(INSERT_SQL, vec![Value::from("kept"), Value::from(40)]);
        let inner = db.in_savepoint(|db| {
            TxOutcome::Rollback(db.execute(INSERT_SQL, vec![Value::from("discarded"), Value::from(41)]))
        });
        TxOutcome::rollback_on_err(outer.and(inner))
    })???;
    println!("after savepoint rollback: {} row(s)", count(&queue)?);

    queue.shutdown();
    Ok(())
}

fn count(queue: &DatabaseQueue) -> DbResult<i64> {
    Ok(queue
        .submit(|db| db.query_i64("SELECT count(*) FROM Persons", ()))?
        .unwrap_or(0))
}
