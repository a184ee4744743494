//! Transaction handles returned by [`crate::Database::txn_begin`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::Superblock;

/// A transaction in progress against a [`crate::Database`].
///
/// Puts and deletes issued through [`crate::Table::put`]/[`crate::Table::delete`]
/// with this transaction are appended to the WAL immediately (so they survive a
/// crash followed by replay of an uncommitted-but-logged transaction only if a
/// matching `TXNC` is later seen) but are not observable to other readers of
/// the table until [`Transaction::commit`] fsyncs the commit record, per the
/// ordering guarantee in the facade's durability design.
pub struct Transaction {
    pub(crate) inner: Arc<Mutex<Superblock>>,
    pub(crate) txn_id: u64,
    done: bool,
}

impl Transaction {
    pub(crate) fn new(inner: Arc<Mutex<Superblock>>, txn_id: u64) -> Self {
        Self {
            inner,
            txn_id,
            done: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.txn_id
    }

    /// Commit this transaction. When `sync` is true, the commit record is
    /// fsynced before this transaction's writes become visible to other
    /// readers; this is the durable path and what callers should use unless
    /// they are deliberately exercising crash-recovery behavior.
    pub fn commit(mut self, sync: bool) -> Result<()> {
        self.done = true;
        self.inner.lock().txn_commit(self.txn_id, sync)
    }

    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.inner.lock().txn_abort(self.txn_id)
    }
}

impl Drop for Transaction {
    /// A transaction dropped without an explicit commit/abort is aborted, so
    /// its buffered writes never leak into a table's visible state.
    fn drop(&mut self) {
        if !self.done {
            let _ = self.inner.lock().txn_abort(self.txn_id);
        }
    }
}
