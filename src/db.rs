//! The database facade: the minimal `open`/`create`/`table`/`txn_*` surface
//! wired on top of the storage core, mirroring the original `PageDb` class
//! closely enough to drive and test the core end to end.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::storage::Superblock;
use crate::table::Table;
use crate::txn::Transaction;

/// An open, embedded key/value database.
///
/// `Database` is a thin, cloneable handle: all state lives behind an
/// `Arc<Mutex<Superblock>>`, so cloning a handle and using both clones from
/// the same thread is fine, but the store is single-writer by design (see
/// the Non-goals in the crate-level docs) — concurrent access from multiple
/// threads is left undefined, matching the original's single-threaded,
/// cooperative scheduling model.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<Superblock>>,
}

impl Database {
    /// Initialize a brand-new database at `dir`. Fails if a superblock
    /// already exists there.
    pub fn create<P: AsRef<Path>>(dir: P, config: Config) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        info!(dir = %dir.display(), "creating database");
        let sb = Superblock::create(dir, config.target_block_size())?;
        Ok(Self {
            inner: Arc::new(Mutex::new(sb)),
        })
    }

    /// Open an existing database at `dir`, replaying its WAL to reconstruct
    /// in-memory state since the last checkpoint.
    pub fn open<P: AsRef<Path>>(dir: P, config: Config) -> Result<Self> {
        let dir = dir.as_ref();
        info!(dir = %dir.display(), "opening database");
        let sb = Superblock::open(dir, config.target_block_size())?;
        Ok(Self {
            inner: Arc::new(Mutex::new(sb)),
        })
    }

    /// Create a table named `name` (must match `^\w+$`). The table's root is
    /// created empty; it is populated lazily by the first checkpoint.
    pub fn create_table(&self, name: &str) -> Result<Table> {
        self.inner.lock().create_table(name)?;
        Ok(Table {
            inner: self.inner.clone(),
            name: name.to_string(),
        })
    }

    /// Return a handle to an existing table.
    pub fn table(&self, name: &str) -> Result<Table> {
        if !self.inner.lock().has_table(name) {
            return Err(crate::error::DbError::NotFound(format!("table {name}")));
        }
        Ok(Table {
            inner: self.inner.clone(),
            name: name.to_string(),
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.lock().table_names()
    }

    /// Begin a new transaction. Writes against it via [`Table::put`]/
    /// [`Table::delete`] are invisible to other readers until
    /// [`Transaction::commit`].
    pub fn txn_begin(&self) -> Result<Transaction> {
        let txn_id = self.inner.lock().txn_begin()?;
        Ok(Transaction::new(self.inner.clone(), txn_id))
    }

    /// Fold every table's buffered writes into new immutable blocks and
    /// publish a new superblock generation. See [`crate::storage::superblock`]
    /// for the exact algorithm and its crash-consistency guarantees.
    pub fn checkpoint(&self) -> Result<bool> {
        self.inner.lock().checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_open_table_round_trip() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("people").unwrap();
        t.put(None, b"name", b"jeff").unwrap();
        assert_eq!(t.get(None, b"name").unwrap().as_deref(), Some(&b"jeff"[..]));
        assert!(t.exists(None, b"name").unwrap());

        t.delete(None, b"name").unwrap();
        assert!(!t.exists(None, b"name").unwrap());
    }

    #[test]
    fn transaction_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("t").unwrap();

        let txn = db.txn_begin().unwrap();
        t.put(Some(&txn), b"k", b"v").unwrap();
        assert_eq!(t.get(None, b"k").unwrap(), None);
        assert_eq!(t.get(Some(&txn), b"k").unwrap().as_deref(), Some(&b"v"[..]));

        txn.commit(true).unwrap();
        assert_eq!(t.get(None, b"k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn dropping_an_uncommitted_transaction_aborts_it() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("t").unwrap();
        {
            let txn = db.txn_begin().unwrap();
            t.put(Some(&txn), b"k", b"v").unwrap();
        }
        assert_eq!(t.get(None, b"k").unwrap(), None);
    }

    #[test]
    fn checkpoint_and_reopen_preserve_state() {
        let dir = tempdir().unwrap();
        {
            let db = Database::create(dir.path(), Config::default()).unwrap();
            let t = db.create_table("t").unwrap();
            t.put(None, b"a", b"1").unwrap();
            assert!(db.checkpoint().unwrap());
        }
        let db = Database::open(dir.path(), Config::default()).unwrap();
        let t = db.table("t").unwrap();
        assert_eq!(t.get(None, b"a").unwrap().as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn table_not_found_is_an_error() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), Config::default()).unwrap();
        assert!(db.table("missing").is_err());
    }
}
