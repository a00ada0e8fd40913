//! RocksDB-backed storage for the index keyspace.
//!
//! All six key families live in the default keyspace of one `TransactionDB`;
//! batch atomicity comes from committing a single transaction per mutation
//! batch, and readers share the same handle (RocksDB supports concurrent
//! readers alongside the single serialized writer above this layer).
//!
//! # Quick Start
//!
//! ```ignore
//! let mut storage = Storage::readwrite(db_path);
//! storage.ready()?;
//! let storage = Arc::new(storage);
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use rocksdb::{Options, TransactionDB, TransactionDBOptions};

/// Storage lifecycle: construct with a path, then `ready()` to open.
///
/// The two-phase construction mirrors how consumers are wired: the handle is
/// created, shared via `Arc`, and opened exactly once before any consumer
/// starts.
pub struct Storage {
    db_path: PathBuf,
    db_options: Options,
    txn_db_options: TransactionDBOptions,
    db: Option<TransactionDB>,
}

impl Storage {
    /// Create a read-write storage instance. Only one read-write instance
    /// may own a database directory at a time.
    pub fn readwrite(db_path: &Path) -> Self {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        Self {
            db_path: db_path.to_path_buf(),
            db_options,
            txn_db_options: TransactionDBOptions::default(),
            db: None,
        }
    }

    /// Replace the RocksDB options used at open time.
    pub fn with_options(mut self, db_options: Options) -> Self {
        self.db_options = db_options;
        self
    }

    /// Open the database. Must be called before any read or write.
    pub fn ready(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }
        tracing::info!(path = %self.db_path.display(), "Opening index store");
        let db = TransactionDB::open(&self.db_options, &self.txn_db_options, &self.db_path)?;
        self.db = Some(db);
        Ok(())
    }

    /// Access the open database handle.
    pub fn transaction_db(&self) -> Result<&TransactionDB> {
        self.db
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Storage not ready - call ready() first"))
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Point read from the default keyspace.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.transaction_db()?.get(key)?)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("db_path", &self.db_path)
            .field("ready", &self.db.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ready_is_required() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::readwrite(temp_dir.path());
        assert!(storage.transaction_db().is_err());
    }

    #[test]
    fn test_ready_and_basic_io() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = Storage::readwrite(temp_dir.path());
        storage.ready().unwrap();

        let db = storage.transaction_db().unwrap();
        let txn = db.transaction();
        txn.put(b"!pkg!a@1.0.0", b"value").unwrap();
        txn.commit().unwrap();

        assert_eq!(storage.get(b"!pkg!a@1.0.0").unwrap().unwrap(), b"value");
        assert_eq!(storage.get(b"!pkg!missing").unwrap(), None);
    }

    #[test]
    fn test_ready_twice_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = Storage::readwrite(temp_dir.path());
        storage.ready().unwrap();
        storage.ready().unwrap();
    }
}
