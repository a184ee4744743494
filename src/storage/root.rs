//! Table roots: the ordered, immutable list of `(last_key, file_id)`
//! entries partitioning one table's key space across block files.
//!
//! A root is published once, in full, under a fresh id — there is no
//! in-place update. The checkpoint/merge engine builds the next root's
//! entries in memory and writes them out as a new `root.<id>` file; the
//! superblock is what actually switches a table over to the new root.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::storage::codec::{parse_frame, write_frame};
use crate::storage::record::{self, RootEnt, RootIdx, ROOT_MAGIC, TAG_ROOT};

pub fn root_file_name(root_id: u64) -> String {
    format!("root.{root_id:x}")
}

/// An in-memory, loaded table root. `entries` is always sorted by key.
///
/// There is no `insert`/`delete`/`dirty` surface here: a root is rebuilt
/// wholesale by the checkpoint engine (`Superblock::checkpoint_incremental`)
/// and published once under a fresh id, so in-place mutation of a loaded
/// root is never needed.
#[derive(Debug, Clone)]
pub struct TableRoot {
    root_id: u64,
    entries: Vec<RootEnt>,
}

impl TableRoot {
    pub fn empty(root_id: u64) -> Self {
        Self {
            root_id,
            entries: Vec::new(),
        }
    }

    pub fn open(dir: &Path, root_id: u64) -> Result<Self> {
        let path = dir.join(root_file_name(root_id));
        let bytes = std::fs::read(&path)?;
        if bytes.len() < ROOT_MAGIC.len() || &bytes[..8] != ROOT_MAGIC.as_slice() {
            return Err(DbError::Corruption(format!(
                "{}: bad table root magic",
                path.display()
            )));
        }
        let (tag, payload, _) = parse_frame(&bytes[8..])?
            .ok_or_else(|| DbError::Corruption(format!("{}: truncated root frame", path.display())))?;
        if tag != TAG_ROOT {
            return Err(DbError::Corruption(format!(
                "{}: expected ROOT frame",
                path.display()
            )));
        }
        let idx: RootIdx = record::decode(payload)?;
        Ok(Self {
            root_id,
            entries: idx.entries,
        })
    }

    /// Write a new, immutable root file under `new_root_id` and return the
    /// loaded `TableRoot` for it. Fails if that id is already in use.
    pub fn create(dir: &Path, new_root_id: u64, entries: Vec<RootEnt>) -> Result<Self> {
        debug_assert!(entries.windows(2).all(|w| w[0].key < w[1].key));
        let path = dir.join(root_file_name(new_root_id));
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(&ROOT_MAGIC)?;
        let payload = record::encode(&RootIdx {
            entries: entries.clone(),
        })?;
        write_frame(&mut file, &TAG_ROOT, &payload)?;
        file.sync_all()?;
        Ok(Self {
            root_id: new_root_id,
            entries,
        })
    }

    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    pub fn entries(&self) -> &[RootEnt] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the first entry whose `last_key >= key`: the block that
    /// would contain `key` if it exists, since each entry's key is the
    /// largest key in its block and entries are sorted. The final entry is
    /// the catch-all for any key greater than every prior `last_key`.
    pub fn lookup_pos(&self, key: &[u8]) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        match self.entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(i) => Some(i),
            Err(i) if i < self.entries.len() => Some(i),
            Err(_) => Some(self.entries.len() - 1),
        }
    }

    /// The block entry that would contain `key`, if any block's range
    /// covers it.
    pub fn lookup(&self, key: &[u8]) -> Option<&RootEnt> {
        self.lookup_pos(key).map(|i| &self.entries[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ent(key: &str, file_id: u64) -> RootEnt {
        RootEnt {
            key: key.as_bytes().to_vec(),
            file_id,
        }
    }

    #[test]
    fn create_then_open_round_trip() {
        let dir = tempdir().unwrap();
        let entries = vec![ent("age", 1), ent("name", 2)];
        TableRoot::create(dir.path(), 1, entries.clone()).unwrap();
        let root = TableRoot::open(dir.path(), 1).unwrap();
        assert_eq!(root.entries(), entries.as_slice());
    }

    #[test]
    fn lookup_covers_key_space() {
        let entries = vec![ent("age", 1), ent("name", 2), ent("zz", 3)];
        let root = TableRoot {
            root_id: 1,
            entries,
        };
        assert_eq!(root.lookup(b"aaa").unwrap().file_id, 1);
        assert_eq!(root.lookup(b"age").unwrap().file_id, 1);
        assert_eq!(root.lookup(b"cow").unwrap().file_id, 2);
        assert_eq!(root.lookup(b"name").unwrap().file_id, 2);
        // beyond every last_key: falls into the final entry, the catch-all
        assert_eq!(root.lookup(b"zzzz").unwrap().file_id, 3);
    }

    #[test]
    fn empty_root_has_no_coverage() {
        let root = TableRoot::empty(1);
        assert!(root.lookup(b"anything").is_none());
    }

    #[test]
    fn create_refuses_to_clobber_existing_id() {
        let dir = tempdir().unwrap();
        TableRoot::create(dir.path(), 1, vec![ent("a", 1)]).unwrap();
        assert!(TableRoot::create(dir.path(), 1, vec![ent("b", 2)]).is_err());
    }
}
