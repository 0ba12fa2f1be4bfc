//! Integration tests for the serial queue and its connection.
//!
//! - `harness.rs`     - shared fixtures
//! - `queue.rs`       - serialization, ordering, reentrancy, panics, lifecycle
//! - `transactions.rs` - commit/rollback scopes and savepoints
//! - `cursor.rs`      - typed access, naming and cursor misuse
//! - `cache.rs`       - statement cache behaviour
//! - `errors.rs`      - last-error tracking
//! - `checkpoint.rs`  - WAL checkpoints on disk
//! - `schema.rs`      - introspection and maintenance helpers

mod cache;
mod checkpoint;
pub(crate) mod harness;
mod transactions;
