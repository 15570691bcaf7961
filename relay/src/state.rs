//! The durable key-value state the relay runs on, and the transactions used to change it.
//!
//! A [StateTx] buffers its writes and remembers the value of every key it read. At commit the backend checks, under
//! its own write lock, that none of those keys has changed since. If one has, the whole transaction is rejected and
//! [Ledger::transact] runs it again against the new state. This is what serialises concurrent read-modify-write
//! cycles on the counter records without the relay holding any locks of its own.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::error::{RelayError, Result};

/// The keys read by a transaction, with the value observed for each.
pub type ReadSet = BTreeMap<String, Option<Vec<u8>>>;
/// The values a transaction will write.
pub type WriteSet = BTreeMap<String, Vec<u8>>;

/// Storage for opaque byte values addressed by string keys.
pub trait StateBackend: Send + Sync + Debug {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically apply `writes`, provided every key in `reads` still holds the observed value. Returns `false`
    /// without writing anything if there is a conflict.
    fn commit(&self, reads: &ReadSet, writes: &WriteSet) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().get(key).cloned())
    }

    fn commit(&self, reads: &ReadSet, writes: &WriteSet) -> Result<bool> {
        let mut state = self.state.write();
        if reads
            .iter()
            .any(|(key, observed)| state.get(key) != observed.as_ref())
        {
            return Ok(false);
        }
        for (key, value) in writes {
            state.insert(key.clone(), value.clone());
        }
        Ok(true)
    }
}

/// A [StateBackend] persisted in a single SQLite table.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )?;
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
        })
    }
}

fn sqlite_get(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    conn.query_row("SELECT value FROM state WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

impl StateBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(sqlite_get(&self.conn.lock(), key)?)
    }

    fn commit(&self, reads: &ReadSet, writes: &WriteSet) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (key, observed) in reads {
            if sqlite_get(&tx, key)? != *observed {
                // Dropping `tx` rolls it back.
                return Ok(false);
            }
        }
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO state (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in writes {
                insert.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }
}

/// An event emitted by a transaction and published once it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

/// A unit of work against the ledger. Nothing becomes visible to other transactions until [Ledger::commit].
#[derive(Debug)]
pub struct StateTx {
    backend: Arc<dyn StateBackend>,
    reads: ReadSet,
    writes: WriteSet,
    event: Option<ChainEvent>,
}

impl StateTx {
    /// Read a key, seeing this transaction's own writes.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(observed) = self.reads.get(key) {
            return Ok(observed.clone());
        }
        let value = self.backend.get(key)?;
        self.reads.insert(key.to_owned(), value.clone());
        Ok(value)
    }

    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_owned(), value);
    }

    /// Set the event published when this transaction commits. A transaction carries at most one event; setting it
    /// again replaces the previous one.
    pub fn set_event(&mut self, name: &str, payload: Vec<u8>) {
        self.event = Some(ChainEvent {
            name: name.to_owned(),
            payload,
        });
    }

    fn is_read_only(&self) -> bool {
        self.writes.is_empty() && self.event.is_none()
    }
}

/// The relay's view of the durable state, plus the channel on which committed events are published.
#[derive(Debug, Clone)]
pub struct Ledger {
    backend: Arc<dyn StateBackend>,
    events: broadcast::Sender<ChainEvent>,
    max_commit_attempts: u32,
}

pub fn event_channel_capacity_default() -> usize {
    1024
}

pub fn max_commit_attempts_default() -> u32 {
    5
}

impl Ledger {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        event_channel_capacity: usize,
        max_commit_attempts: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(event_channel_capacity.max(1));
        Ledger {
            backend,
            events,
            max_commit_attempts: max_commit_attempts.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            event_channel_capacity_default(),
            max_commit_attempts_default(),
        )
    }

    /// Receive the events of every transaction committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn begin(&self) -> StateTx {
        StateTx {
            backend: self.backend.clone(),
            reads: ReadSet::new(),
            writes: WriteSet::new(),
            event: None,
        }
    }

    /// Commit `tx` once. A conflict with a concurrent transaction is reported as a storage error.
    pub fn commit(&self, tx: StateTx) -> Result<()> {
        if self.try_commit(tx)? {
            Ok(())
        } else {
            Err(RelayError::Storage(
                "transaction conflicted with a concurrent write".to_owned(),
            ))
        }
    }

    /// Commit `tx` once, returning `false` if it conflicted with a concurrent transaction. Nothing is written and no
    /// event is published in that case.
    pub fn try_commit(&self, tx: StateTx) -> Result<bool> {
        if tx.is_read_only() {
            return Ok(true);
        }
        if !self.backend.commit(&tx.reads, &tx.writes)? {
            return Ok(false);
        }
        trace!(writes = tx.writes.len(), "transaction committed");
        if let Some(event) = tx.event {
            // Nobody listening is not an error; the message log is the durable copy.
            if self.events.send(event).is_err() {
                debug!("no subscribers for committed event");
            }
        }
        Ok(true)
    }

    /// Run `f` in a fresh transaction and commit it, re-running `f` from scratch if the commit conflicts. An error
    /// from `f` discards the transaction.
    ///
    /// `f` may run more than once, so it must not have side effects outside the transaction.
    pub fn transact<T>(&self, mut f: impl FnMut(&mut StateTx) -> Result<T>) -> Result<T> {
        for attempt in 1..=self.max_commit_attempts {
            let mut tx = self.begin();
            let output = f(&mut tx)?;
            if self.try_commit(tx)? {
                return Ok(output);
            }
            debug!(attempt, "transaction conflicted, retrying");
        }
        warn!(
            attempts = self.max_commit_attempts,
            "giving up on conflicting transaction"
        );
        Err(RelayError::Storage(format!(
            "transaction still conflicting after {} attempts",
            self.max_commit_attempts
        )))
    }
}
