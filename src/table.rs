//! `Table` handles: the `put`/`get`/`delete`/`exists` surface scoped to one
//! named table, optionally inside a transaction.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::Superblock;
use crate::txn::Transaction;

/// A handle to one named table within a [`crate::Database`].
///
/// Cloning a `Table` is cheap (it shares the database's superblock lock) and
/// produces an independent handle to the same underlying table.
#[derive(Clone)]
pub struct Table {
    pub(crate) inner: Arc<Mutex<Superblock>>,
    pub(crate) name: String,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Put `key -> value`, scoped to `txn` if given, or to an
    /// implicit single-record transaction committed immediately with
    /// `sync = true` otherwise.
    pub fn put(&self, txn: Option<&Transaction>, key: &[u8], value: &[u8]) -> Result<()> {
        match txn {
            Some(t) => self.inner.lock().put(&self.name, t.txn_id, key, value),
            None => self.with_implicit_txn(|sb, txn_id| sb.put(&self.name, txn_id, key, value)),
        }
    }

    /// Delete `key`, scoped to `txn` if given, or to an implicit
    /// single-record transaction committed immediately otherwise.
    pub fn delete(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<()> {
        match txn {
            Some(t) => self.inner.lock().delete(&self.name, t.txn_id, key),
            None => self.with_implicit_txn(|sb, txn_id| sb.delete(&self.name, txn_id, key)),
        }
    }

    /// Read `key`. When `txn` is given, sees that transaction's own
    /// uncommitted writes layered on top of the last committed state.
    pub fn get(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner
            .lock()
            .get(&self.name, txn.map(|t| t.txn_id), key)
    }

    pub fn exists(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<bool> {
        self.inner
            .lock()
            .exists(&self.name, txn.map(|t| t.txn_id), key)
    }

    fn with_implicit_txn(&self, op: impl FnOnce(&mut Superblock, u64) -> Result<()>) -> Result<()> {
        let mut sb = self.inner.lock();
        let txn_id = sb.txn_begin()?;
        if let Err(e) = op(&mut sb, txn_id) {
            let _ = sb.txn_abort(txn_id);
            return Err(e);
        }
        sb.txn_commit(txn_id, true)
    }
}
