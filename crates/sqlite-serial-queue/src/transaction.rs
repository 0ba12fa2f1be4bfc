//! Transactions and savepoints on a [`Database`].

use crate::db::{quote_identifier, Database};
use crate::{DbError, DbResult};
use tracing::{debug, warn};

/// Locking mode used by `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    /// Locks are taken on first read or write.
    Deferred,
    /// The write lock is taken at begin.
    Immediate,
    /// The write lock is taken at begin; readers are excluded outside WAL.
    #[default]
    Exclusive,
}

impl TransactionKind {
    pub fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionKind::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

/// What a transactional unit of work decided, together with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome<T> {
    Commit(T),
    Rollback(T),
}

impl<T> TxOutcome<T> {
    pub fn is_rollback(&self) -> bool {
        matches!(self, TxOutcome::Rollback(_))
    }

    pub fn into_value(self) -> T {
        match self {
            TxOutcome::Commit(v) | TxOutcome::Rollback(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TxOutcome<U> {
        match self {
            TxOutcome::Commit(v) => TxOutcome::Commit(f(v)),
            TxOutcome::Rollback(v) => TxOutcome::Rollback(f(v)),
        }
    }
}

impl<T> TxOutcome<DbResult<T>> {
    /// Commit on `Ok`, roll back on `Err`.
    pub fn rollback_on_err(result: DbResult<T>) -> Self {
        if result.is_ok() {
            TxOutcome::Commit(result)
        } else {
            TxOutcome::Rollback(result)
        }
    }
}

impl Database {
    pub fn begin_transaction(&self, kind: TransactionKind) -> DbResult<()> {
        self.execute(kind.begin_sql(), ())?;
        debug!(path = %self.path, ?kind, "Began transaction");
        Ok(())
    }

    pub fn begin_deferred_transaction(&self) -> DbResult<()> {
        self.begin_transaction(TransactionKind::Deferred)
    }

    pub fn begin_immediate_transaction(&self) -> DbResult<()> {
        self.begin_transaction(TransactionKind::Immediate)
    }

    pub fn begin_exclusive_transaction(&self) -> DbResult<()> {
        self.begin_transaction(TransactionKind::Exclusive)
    }

    pub fn commit(&self) -> DbResult<()> {
        self.execute("COMMIT TRANSACTION", ())?;
        self.savepoints.borrow_mut().clear();
        debug!(path = %self.path, "Committed transaction");
        Ok(())
    }

    pub fn rollback(&self) -> DbResult<()> {
        self.execute("ROLLBACK TRANSACTION", ())?;
        self.savepoints.borrow_mut().clear();
        debug!(path = %self.path, "Rolled back transaction");
        Ok(())
    }

    /// Run `f` inside a transaction of `kind`, committing or rolling back as
    /// it decides.
    ///
    /// A failed commit rolls the transaction back and returns the commit
    /// error.
    pub fn transaction<T>(
        &mut self,
        kind: TransactionKind,
        f: impl FnOnce(&mut Database) -> TxOutcome<T>,
    ) -> DbResult<T> {
        self.begin_transaction(kind)?;
        match f(self) {
            TxOutcome::Commit(value) => {
                if let Err(err) = self.commit() {
                    warn!(path = %self.path, error = %err, "Commit failed, rolling back");
                    let last = self.last_error();
                    if self.is_in_transaction() {
                        if let Err(rollback_err) = self.rollback() {
                            warn!(path = %self.path, error = %rollback_err, "Rollback after failed commit failed");
                        }
                    }
                    self.last_error.replace(last);
                    return Err(err);
                }
                Ok(value)
            }
            TxOutcome::Rollback(value) => {
                if self.is_in_transaction() {
                    self.rollback()?;
                }
                Ok(value)
            }
        }
    }

    /// Start a named savepoint. Names must be unique on the active stack.
    pub fn start_savepoint(&self, name: &str) -> DbResult<()> {
        if self.savepoints.borrow().iter().any(|s| s == name) {
            let err = DbError::DuplicateSavepoint(name.to_string());
            self.record_error("savepoint", &err);
            return Err(err);
        }
        self.execute_uncached(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        self.savepoints.borrow_mut().push(name.to_string());
        Ok(())
    }

    /// Release `name` and every savepoint started after it.
    pub fn release_savepoint(&self, name: &str) -> DbResult<()> {
        let pos = self.savepoint_position(name)?;
        self.execute_uncached(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        self.savepoints.borrow_mut().truncate(pos);
        Ok(())
    }

    /// Undo work since `name` was started. `name` stays active.
    pub fn rollback_to_savepoint(&self, name: &str) -> DbResult<()> {
        let pos = self.savepoint_position(name)?;
        self.execute_uncached(&format!(
            "ROLLBACK TRANSACTION TO SAVEPOINT {}",
            quote_identifier(name)
        ))?;
        self.savepoints.borrow_mut().truncate(pos + 1);
        Ok(())
    }

    /// Active savepoint names, outermost first.
    pub fn active_savepoints(&self) -> Vec<String> {
        self.savepoints.borrow().clone()
    }

    /// Run `f` inside a fresh savepoint, rolling back to it when `f` asks.
    ///
    /// The savepoint is released either way, even when the rollback fails.
    /// If the release fails too, the savepoint is dropped from the active
    /// stack. The first error wins.
    pub fn in_savepoint<T>(
        &mut self,
        f: impl FnOnce(&mut Database) -> TxOutcome<T>,
    ) -> DbResult<T> {
        let name = self.next_savepoint_name();
        self.start_savepoint(&name)?;
        let outcome = f(self);
        let rolled_back = if outcome.is_rollback() {
            self.rollback_to_savepoint(&name)
        } else {
            Ok(())
        };
        let rollback_error = rolled_back.is_err().then(|| self.last_error());
        let released = self.release_savepoint(&name);
        if released.is_err() {
            self.forget_savepoint(&name);
        }
        match (rolled_back, released) {
            (Err(err), released) => {
                if let Err(release_err) = released {
                    warn!(path = %self.path, savepoint = %name, error = %release_err, "Release after failed rollback failed");
                }
                self.last_error.replace(rollback_error.flatten());
                Err(err)
            }
            (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(outcome.into_value()),
        }
    }

    /// Drop `name` and everything after it from the active stack without
    /// touching the engine.
    fn forget_savepoint(&self, name: &str) {
        let mut savepoints = self.savepoints.borrow_mut();
        if let Some(pos) = savepoints.iter().rposition(|s| s == name) {
            savepoints.truncate(pos);
        }
    }

    fn next_savepoint_name(&self) -> String {
        let savepoints = self.savepoints.borrow();
        loop {
            let next = self.savepoint_counter.get() + 1;
            self.savepoint_counter.set(next);
            let name = format!("sp_{next}");
            if !savepoints.contains(&name) {
                return name;
            }
        }
    }

    fn savepoint_position(&self, name: &str) -> DbResult<usize> {
        let found = self.savepoints.borrow().iter().rposition(|s| s == name);
        match found {
            Some(pos) => Ok(pos),
            None => {
                let err = DbError::UnknownSavepoint(name.to_string());
                self.record_error("savepoint", &err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kind_is_exclusive() {
        assert_eq!(TransactionKind::default(), TransactionKind::Exclusive);
        assert_eq!(
            TransactionKind::Immediate.begin_sql(),
            "BEGIN IMMEDIATE TRANSACTION"
        );
    }

    #[test]
    fn outcome_helpers() {
        let ok: TxOutcome<DbResult<i32>> = TxOutcome::rollback_on_err(Ok(1));
        assert!(!ok.is_rollback());
        let failed: TxOutcome<DbResult<i32>> = TxOutcome::rollback_on_err(Err(DbError::Aborted));
        assert!(failed.is_rollback());
        assert_eq!(TxOutcome::Commit(2).map(|v| v * 2).into_value(), 4);
    }
}
