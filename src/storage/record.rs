//! Structured payloads carried inside WAL, table-root, and superblock frames.
//!
//! Every record here is a plain serde struct encoded with `bincode`; the
//! framing (tag, length, CRC) is handled by [`crate::storage::codec`] and is
//! not part of these types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// WAL frame tags, matching the four-byte ASCII tags on disk.
pub const TAG_TXN_START: [u8; 4] = *b"TXN ";
pub const TAG_TXN_COMMIT: [u8; 4] = *b"TXNC";
pub const TAG_TXN_ABORT: [u8; 4] = *b"TXNA";
pub const TAG_LOG_DATA: [u8; 4] = *b"LOGR";
pub const TAG_LOG_TABLE: [u8; 4] = *b"LTBL";
pub const TAG_SUPER_OP: [u8; 4] = *b"SUPR";

/// Table-root frame tag and file magic.
pub const TAG_ROOT: [u8; 4] = *b"ROOT";
pub const ROOT_MAGIC: [u8; 8] = *b"TABLROOT";

/// Block-file frame tags and magic.
pub const TAG_DATA: [u8; 4] = *b"DATA";
pub const TAG_DIDX: [u8; 4] = *b"DIDX";
pub const TAG_DTRL: [u8; 4] = *b"DTRL";
pub const BLOCK_MAGIC: [u8; 8] = *b"BLOCK   ";

/// Superblock frame tag and file magic.
pub const TAG_SUPR: [u8; 4] = *b"SUPR";
pub const SUPER_MAGIC: [u8; 8] = *b"SUPER   ";

/// WAL log file magic (header of `log.<hex_id>`).
pub const LOGGER_MAGIC: [u8; 8] = *b"LOGGER  ";

/// Set on a `LOGR` record to mark the entry as a delete (tombstone) rather
/// than a put.
pub const LOGR_DELETE: u32 = 1 << 0;

/// bincode configuration shared by every record in this module: little-endian,
/// variable-length integer encoding, no size limit of its own — the 16 MiB
/// payload guard a corrupt length field could otherwise abuse lives in the
/// frame layer ([`crate::storage::codec::MAX_PAYLOAD_LEN`]), not here.
pub fn config() -> impl bincode::config::Config {
    bincode::config::standard()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, config())?)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, config())?;
    Ok(value)
}

/// Payload of a `TXN `/`TXNC`/`TXNA` record: identifies the transaction the
/// operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnOp {
    pub txn_id: u64,
}

/// Payload of a `LOGR` record: one put or delete against a table, scoped to
/// a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogData {
    pub table: String,
    pub txn_id: u64,
    pub recmask: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LogData {
    pub fn is_delete(&self) -> bool {
        self.recmask & LOGR_DELETE != 0
    }
}

/// Payload of an `LTBL` record: a catalog-level operation (table creation)
/// that must be replayed in program order alongside data records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTable {
    pub tabname: String,
    pub txn_id: u64,
    pub recmask: u32,
    pub root_id: u64,
}

impl LogTable {
    /// `recmask` bit 0 marks this as a table *deletion* rather than a
    /// creation. Table deletion is reserved and unimplemented (§4.2); any
    /// record with this bit set is rejected as fatal corruption during
    /// replay rather than silently accepted or ignored.
    pub fn is_delete(&self) -> bool {
        self.recmask & LOGR_DELETE != 0
    }
}

/// Payload of a `SUPR` WAL record: marks that the superblock was republished
/// and records the id allocations it consumed, so replay can fast-forward
/// `next_txn_id`/`next_file_id` without re-reading the superblock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperOp {
    pub next_txn_id: u64,
    pub next_file_id: u64,
}

/// One entry in a table root: the largest key contained in `file_id`'s
/// block, establishing where that block's key range ends. The table's key
/// space is partitioned by the ordered sequence of `RootEnt`s; the final
/// entry is the catch-all for any key greater than every prior `key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootEnt {
    pub key: Vec<u8>,
    pub file_id: u64,
}

/// Decoded contents of a table root's `ROOT` frame: the ordered list of
/// block-covering entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootIdx {
    pub entries: Vec<RootEnt>,
}

/// Catalog entry for one table, as carried inside the superblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub uuid: Uuid,
    pub root_id: u64,
}

/// Decoded contents of the superblock's `SUPR` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockRecord {
    pub version: u32,
    pub db_uuid: Uuid,
    pub log_id: u64,
    pub next_txn_id: u64,
    pub next_file_id: u64,
    pub tables: Vec<TableMeta>,
    /// File ids written as part of an in-progress checkpoint that never
    /// reached a published superblock; reclaimed as garbage on next open.
    pub garbage: Vec<u64>,
}

impl SuperblockRecord {
    pub const CURRENT_VERSION: u32 = 1;
}

/// A fixed-width entry in a block's `DIDX` index array: byte offset of a
/// `DATA` frame within the file, and the length of its key, sufficient to
/// binary-search without decoding every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEnt {
    pub entpos: u32,
    pub k_len: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ent_round_trip() {
        let ent = RootEnt {
            key: b"hello".to_vec(),
            file_id: 42,
        };
        let bytes = encode(&ent).unwrap();
        let back: RootEnt = decode(&bytes).unwrap();
        assert_eq!(ent, back);
    }

    #[test]
    fn superblock_round_trip() {
        let rec = SuperblockRecord {
            version: SuperblockRecord::CURRENT_VERSION,
            db_uuid: Uuid::nil(),
            log_id: 1,
            next_txn_id: 7,
            next_file_id: 3,
            tables: vec![TableMeta {
                name: "test1".to_string(),
                uuid: Uuid::nil(),
                root_id: 1,
            }],
            garbage: vec![],
        };
        let bytes = encode(&rec).unwrap();
        let back: SuperblockRecord = decode(&bytes).unwrap();
        assert_eq!(rec, back);
    }
}
