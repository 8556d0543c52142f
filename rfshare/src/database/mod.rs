//! Transactional record store.
//!
//! This module provides SQLite-based persistent storage for:
//! - Frontends and their reservation blocks
//! - LNBs, dishes and satellites
//! - Muxes with their scan-status headers
//!
//! Records are stored as JSON values keyed by their JSON-encoded key. All
//! access goes through a [`Txn`]; a write transaction is opened with
//! `BEGIN IMMEDIATE` so it excludes concurrent writers, also from other
//! processes sharing the same database file.

mod inventory;
mod records;
mod schema;

pub use inventory::{ImportStats, Inventory};
pub use records::Record;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

/// How long a writer waits for another process's write transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid record: {0}")]
    Invalid(#[from] rfshare_types::RecordError),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    /// Begin a write transaction. Blocks while another writer holds the lock.
    pub fn write_txn(&mut self) -> Result<Txn<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Txn { tx })
    }

    /// Begin a read transaction; it is rolled back when dropped.
    pub fn read_txn(&mut self) -> Result<Txn<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(Txn { tx })
    }

    /// Number of records per table.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(schema::TABLES.len());
        for table in schema::TABLES {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            counts.push((*table, n));
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// A read or write transaction over typed records.
///
/// Dropping a transaction without calling [`Txn::commit`] rolls it back.
pub struct Txn<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl Txn<'_> {
    /// Look up a record by key.
    pub fn find_by_key<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        let k = serde_json::to_string(key)?;
        let sql = format!("SELECT v FROM {} WHERE k = ?1", R::TABLE);
        let value: Option<String> = self
            .tx
            .query_row(&sql, [&k], |row| row.get(0))
            .optional()?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// Like [`Txn::find_by_key`] but a missing record is an error.
    pub fn get<R: Record>(&self, key: &R::Key) -> Result<R>
    where
        R::Key: std::fmt::Debug,
    {
        self.find_by_key(key)?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {:?}", R::TABLE, key)))
    }

    /// All records of a kind, in key order.
    pub fn list<R: Record>(&self) -> Result<Vec<R>> {
        let sql = format!("SELECT v FROM {}", R::TABLE);
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for value in rows {
            records.push(serde_json::from_str::<R>(&value?)?);
        }
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(records)
    }

    /// Records of a kind matching a predicate, in key order.
    pub fn list_where<R: Record>(&self, mut pred: impl FnMut(&R) -> bool) -> Result<Vec<R>> {
        Ok(self.list::<R>()?.into_iter().filter(|r| pred(r)).collect())
    }

    /// Insert or replace a record.
    pub fn put_record<R: Record>(&self, record: &R) -> Result<()> {
        let k = serde_json::to_string(&record.key())?;
        let v = serde_json::to_string(record)?;
        let sql = format!(
            "INSERT INTO {} (k, v, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(k) DO UPDATE SET v = excluded.v, updated_at = excluded.updated_at",
            R::TABLE
        );
        self.tx.execute(&sql, [&k, &v])?;
        Ok(())
    }

    /// Delete a record. Returns false if it did not exist.
    pub fn delete_record<R: Record>(&self, key: &R::Key) -> Result<bool> {
        let k = serde_json::to_string(key)?;
        let sql = format!("DELETE FROM {} WHERE k = ?1", R::TABLE);
        let n = self.tx.execute(&sql, [&k])?;
        Ok(n > 0)
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Roll the transaction back explicitly.
    pub fn abort(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}
