//! Transactional ordered key-value backing store.
//!
//! Provides the storage contract the keystore is written against: named
//! sub-tables keyed by `Hash256`, read and write transaction tokens, and
//! ordered range iteration. Backed by sled; writes are serialized through a
//! single-writer mutex the way an LMDB environment serializes its write
//! transactions, and table handles are sled trees.
//!
//! Transactions are capability tokens: a `&ReadTxn` proves a read context,
//! a `&WriteTxn` proves exclusive write access. `WriteTxn` derefs to
//! `ReadTxn` so reads work inside write transactions.

use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::types::Hash256;

/// Errors from backing-store operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

/// A database environment holding any number of named wallet tables.
pub struct Store {
    db: sled::Db,
    writer: Mutex<()>,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Store {
            db,
            writer: Mutex::new(()),
        })
    }

    /// Open a temporary database (for testing).
    pub fn open_temporary() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Store {
            db,
            writer: Mutex::new(()),
        })
    }

    pub fn tx_begin_read(&self) -> ReadTxn<'_> {
        ReadTxn { _store: self }
    }

    /// Begin the exclusive write transaction. Blocks while another write
    /// transaction is open; do not call with a `WriteTxn` already held on
    /// the same thread.
    pub fn tx_begin_write(&self) -> WriteTxn<'_> {
        let guard = self.writer.lock().expect("store writer mutex poisoned");
        WriteTxn {
            read: ReadTxn { _store: self },
            _guard: guard,
        }
    }

    /// Open or create a named table.
    pub fn table(&self, name: &str) -> Result<Table, StoreError> {
        let tree = self
            .db
            .open_tree(name.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Table { tree })
    }

    /// Drop a named table and all its entries.
    pub fn drop_table(&self, _txn: &WriteTxn<'_>, name: &str) -> Result<(), StoreError> {
        self.db
            .drop_tree(name.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Names of every table in the environment, excluding sled's default.
    pub fn table_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .filter(|name| name != "__sled__default")
            .collect()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

/// A read transaction token.
pub struct ReadTxn<'a> {
    _store: &'a Store,
}

/// An exclusive write transaction token. Writes are visible immediately;
/// exclusivity is what the token guarantees.
pub struct WriteTxn<'a> {
    read: ReadTxn<'a>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Deref for WriteTxn<'a> {
    type Target = ReadTxn<'a>;

    fn deref(&self) -> &ReadTxn<'a> {
        &self.read
    }
}

/// A named table of `Hash256`-keyed records in key order.
#[derive(Clone)]
pub struct Table {
    tree: sled::Tree,
}

impl Table {
    pub fn get(&self, _txn: &ReadTxn<'_>, key: &Hash256) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(value.map(|v| v.to_vec()))
    }

    pub fn put(&self, _txn: &WriteTxn<'_>, key: &Hash256, value: &[u8]) -> Result<(), StoreError> {
        self.tree
            .insert(key.as_bytes(), value)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Delete a record; returns whether it existed.
    pub fn del(&self, _txn: &WriteTxn<'_>, key: &Hash256) -> Result<bool, StoreError> {
        let previous = self
            .tree
            .remove(key.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(previous.is_some())
    }

    /// Iterate records in ascending key order starting at `start` inclusive.
    pub fn iter_from(&self, _txn: &ReadTxn<'_>, start: &Hash256) -> TableIter {
        TableIter {
            inner: self.tree.range(start.as_bytes().as_slice()..),
        }
    }
}

/// Ordered iterator over `(key, value)` records of a table.
pub struct TableIter {
    inner: sled::Iter,
}

impl Iterator for TableIter {
    type Item = Result<(Hash256, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.map_err(|e| StoreError::Io(e.to_string())).and_then(
            |(key, value)| {
                let key: [u8; 32] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("table key is not 32 bytes"))?;
                Ok((Hash256(key), value.to_vec()))
            },
        ))
    }
}
