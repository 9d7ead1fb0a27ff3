//! Shared database handle for long-running processes.
//!
//! One writer connection behind a mutex plus a small pool of read-only
//! connections. The database runs in WAL mode, so searches on a reader see the
//! last committed state and never wait for the writer, and the writer never
//! waits for them. An in-memory store has no readers; its reads go through the
//! writer.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

/// Read connections opened by [`Store::open`] when none is configured.
pub const DEFAULT_READERS: usize = 4;

pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

fn guard(m: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    // Every write is its own transaction, so a poisoned guard still holds a consistent store.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Store {
    /// Open the database at `path` (schema and migrations applied) with
    /// `readers` read-only connections beside the writer.
    pub fn open(path: impl AsRef<Path>, readers: usize) -> Result<Self> {
        let path = path.as_ref();
        let writer = super::open_database(path)?;
        let readers = (0..readers)
            .map(|_| open_reader(path).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(readers = readers.len(), "store opened");
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// A single-connection store over an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(super::open_memory_database()?))
    }

    /// Wrap an already opened connection; reads and writes share it.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        }
    }

    /// The writer connection. Hold it for one unit of work, not longer.
    pub fn write(&self) -> MutexGuard<'_, Connection> {
        guard(&self.writer)
    }

    /// A read connection, round-robin over the pool.
    pub fn read(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.write();
        }
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.readers.len() {
            if let Ok(conn) = self.readers[(start + offset) % self.readers.len()].try_lock() {
                return conn;
            }
        }
        guard(&self.readers[start % self.readers.len()])
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .with_context(|| format!("failed to open read connection to {}", path.display()))?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    conn.pragma_update(None, "query_only", "ON")?;
    Ok(conn)
}
