pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::info;

const READER_POOL_SIZE: usize = 4;

/// SQLite store with one serialized writer and a small pool of read-only
/// connections. Every multi-step mutation (find-or-create pair, append,
/// reaction toggle, read marking) runs inside a transaction on the writer,
/// so concurrent callers observe each step all-or-nothing.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Database {
    /// Opens (or creates) the database at `path` and applies pending
    /// migrations before any reader connects.
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.pragma_update(None, "busy_timeout", 5000)?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "database ready at {} (1 writer, {} readers)",
            path.display(),
            READER_POOL_SIZE
        );

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Runs `f` against one of the read-only connections, picked round-robin.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|_| anyhow::anyhow!("reader connection lock poisoned"))?;
        f(&conn)
    }

    /// Runs `f` against the writer. The connection is handed out `&mut` so
    /// callers can open transactions.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("writer connection lock poisoned"))?;
        f(&mut conn)
    }
}
