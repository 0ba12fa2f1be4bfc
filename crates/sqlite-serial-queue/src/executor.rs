//! Serial database queue on a dedicated worker thread.
//!
//! One thread owns the [`Database`] for its whole life. Units of work are
//! closures sent to it through a channel and run one at a time in submission
//! order; the submitting thread blocks until its closure has finished and
//! receives the closure's result.
//!
//! # Rules for units of work
//!
//! - A unit of work must not submit to the queue that is running it. That
//!   would wait on itself forever, so it is refused with
//!   [`DbError::Reentrant`].
//! - Cursors cannot leave the unit of work that created them. Copy the values
//!   out before returning.
//! - A panic inside a unit of work rolls back any open transaction and is
//!   resumed on the submitting thread. The queue keeps working.
//!
//! # Example
//!
//! ```no_run
//! use sqlite_serial_queue::{DatabaseQueue, Params, QueueOptions, TxOutcome};
//!
//! # fn main() -> sqlite_serial_queue::DbResult<()> {
//! let queue = DatabaseQueue::open(None, QueueOptions::default())?;
//!
//! queue.submit(|db| {
//!     db.execute("CREATE TABLE t (name TEXT)", ())?;
//!     Ok(())
//! })?;
//!
//! let count = queue.in_transaction(|db| {
//!     let result = db
//!         .execute("INSERT INTO t (name) VALUES (?)", Params::positional(["alice"]))
//!         .and_then(|_| db.query_i64("SELECT count(*) FROM t", ()));
//!     TxOutcome::rollback_on_err(result)
//! })??;
//! assert_eq!(count, Some(1));
//! # Ok(())
//! # }
//! ```

use crate::db::{Database, InterruptSlot};
use crate::options::{DatabasePath, QueueOptions};
use crate::transaction::{TransactionKind, TxOutcome};
use crate::{CheckpointMode, CheckpointResult, DbError, DbResult};
use rusqlite::OpenFlags;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, trace, warn};

const WORKER_THREAD_NAME: &str = "sqlite-serial-queue";

type Job = Box<dyn FnOnce(&mut Database) + Send>;
type PanicPayload = Box<dyn Any + Send>;

enum Message {
    Run(Job),
    Close(mpsc::Sender<DbResult<()>>),
    Shutdown,
}

struct QueueInner {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
    interrupt: InterruptSlot,
    path: DatabasePath,
    options: QueueOptions,
    submitted: AtomicU64,
}

impl QueueInner {
    fn send(&self, message: Message) -> DbResult<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| DbError::QueueClosed),
            None => Err(DbError::QueueClosed),
        }
    }

    fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };
        // The worker may already be gone; joining below is enough then.
        let _ = sender.send(Message::Shutdown);
        drop(sender);

        if thread::current().id() == self.worker_thread {
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(path = %self.path, "Database queue worker panicked");
            }
        }
        info!(path = %self.path, "Database queue shut down");
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a serial database queue. Cheap to clone; every clone feeds the
/// same worker. The worker stops when the last handle is dropped or
/// [`DatabaseQueue::shutdown`] is called.
#[derive(Clone)]
pub struct DatabaseQueue {
    inner: Arc<QueueInner>,
}

impl DatabaseQueue {
    /// Start a worker thread and open the database on it.
    ///
    /// `None` opens a private in-memory database and an empty path a private
    /// temporary one. File paths get their parent directory created.
    pub fn open(path: Option<&Path>, options: QueueOptions) -> DbResult<Self> {
        Self::open_at(DatabasePath::from_optional(path), options)
    }

    /// Queue over a private in-memory database.
    pub fn in_memory(options: QueueOptions) -> DbResult<Self> {
        Self::open_at(DatabasePath::Memory, options)
    }

    pub fn open_at(path: DatabasePath, options: QueueOptions) -> DbResult<Self> {
        info!(path = %path, "Opening database queue");

        let (tx, rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<DbResult<InterruptSlot>>();

        let worker_path = path.clone();
        let worker_options = options.clone();
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut db = Database::new(worker_path, worker_options.settings);
                let opened = db
                    .open_with_flags(worker_options.flags, worker_options.vfs.as_deref())
                    .map(|()| db.interrupt_slot());
                let ok = opened.is_ok();
                if ready_tx.send(opened).is_err() || !ok {
                    return;
                }
                run_worker(&mut db, rx);
            })?;

        let interrupt = match ready_rx.recv() {
            Ok(Ok(slot)) => slot,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(DbError::QueueClosed);
            }
        };

        let worker_thread = worker.thread().id();
        Ok(Self {
            inner: Arc::new(QueueInner {
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
                worker_thread,
                interrupt,
                path,
                options,
                submitted: AtomicU64::new(0),
            }),
        })
    }

    /// Run `f` on the worker with exclusive use of the connection and return
    /// its result.
    ///
    /// A connection closed through [`DatabaseQueue::close`] is reopened
    /// first.
    pub fn submit<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move |db| {
            db.ensure_open()?;
            f(db)
        })
    }

    /// Run `f` inside a transaction of `kind`. `f` decides between commit
    /// and rollback; a failed begin or commit is returned as the error.
    pub fn submit_transaction<F, T>(&self, kind: TransactionKind, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move |db| db.transaction(kind, f))
    }

    /// Exclusive transaction.
    pub fn in_transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_transaction(TransactionKind::default(), f)
    }

    pub fn in_deferred_transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_transaction(TransactionKind::Deferred, f)
    }

    pub fn in_immediate_transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_transaction(TransactionKind::Immediate, f)
    }

    pub fn in_exclusive_transaction<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_transaction(TransactionKind::Exclusive, f)
    }

    /// Run `f` inside a fresh savepoint, nested in whatever transaction is
    /// open.
    pub fn submit_savepoint<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> TxOutcome<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move |db| db.in_savepoint(f))
    }

    /// Checkpoint the write-ahead log. `schema` defaults to `main`.
    pub fn checkpoint(
        &self,
        mode: CheckpointMode,
        schema: Option<String>,
    ) -> DbResult<CheckpointResult> {
        self.submit(move |db| db.checkpoint(mode, schema.as_deref()))
    }

    /// Cancel the statement currently running on the worker, if any. Safe to
    /// call from any thread, including while another caller is blocked in
    /// [`DatabaseQueue::submit`].
    pub fn interrupt(&self) -> bool {
        debug!(path = %self.inner.path, "Interrupt requested");
        self.inner.interrupt.interrupt()
    }

    /// Close the connection after work already queued. The worker stays up and
    /// the next submission reopens the database.
    pub fn close(&self) -> DbResult<()> {
        if self.on_worker_thread() {
            return Err(DbError::Reentrant);
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.inner.send(Message::Close(reply_tx))?;
        reply_rx.recv().map_err(|_| DbError::QueueClosed)?
    }

    /// Stop the worker after work already queued and close the database.
    /// Later submissions fail with [`DbError::QueueClosed`].
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn path(&self) -> &DatabasePath {
        &self.inner.path
    }

    pub fn open_flags(&self) -> OpenFlags {
        self.inner.options.flags
    }

    pub fn vfs(&self) -> Option<&str> {
        self.inner.options.vfs.as_deref()
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.worker_thread
    }

    fn dispatch<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.on_worker_thread() {
            return Err(DbError::Reentrant);
        }

        let seq = self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = mpsc::channel::<Result<DbResult<T>, PanicPayload>>();
        let job: Job = Box::new(move |db: &mut Database| {
            trace!(seq, "Running unit of work");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(db)));
            if let Ok(result) = &outcome {
                trace!(seq, ok = result.is_ok(), "Unit of work completed");
            } else {
                error!(seq, "Unit of work panicked");
                if db.is_in_transaction() {
                    if let Err(err) = db.rollback() {
                        warn!(error = %err, "Rollback after panic failed");
                    }
                }
            }
            // The submitter may have gone away; nothing left to deliver to.
            let _ = reply_tx.send(outcome);
        });
        self.inner.send(Message::Run(job))?;
        trace!(seq, "Unit of work queued");

        match reply_rx.recv() {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(DbError::QueueClosed),
        }
    }
}

fn run_worker(db: &mut Database, rx: mpsc::Receiver<Message>) {
    debug!(path = %db.path(), "Database queue worker started");
    for message in rx {
        match message {
            Message::Run(job) => job(db),
            Message::Close(reply) => {
                let _ = reply.send(db.close());
            }
            Message::Shutdown => break,
        }
    }
    if let Err(err) = db.close() {
        warn!(path = %db.path(), error = %err, "Failed to close database on shutdown");
    }
    debug!(path = %db.path(), "Database queue worker stopped");
}

impl std::fmt::Debug for DatabaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseQueue")
            .field("path", &self.inner.path)
            .field("options", &self.inner.options)
            .finish()
    }
}
