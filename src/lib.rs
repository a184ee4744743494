//! `pagedb`: an embedded, single-process, on-disk key/value store.
//!
//! The store is organized as a log-structured database with periodic
//! checkpointing into immutable, sorted, memory-mapped blocks. Mutations are
//! made durable by a record-oriented write-ahead log; the
//! [`storage`] module is where essentially all of the engineering lives:
//!
//! - [`storage::codec`] / [`storage::checksum`] — the framed, CRC-protected
//!   record format everything else is built on.
//! - [`storage::wal`] — the append-only write-ahead log.
//! - [`storage::block`] — immutable sorted block files.
//! - [`storage::root`] — table roots, the ordered index of blocks.
//! - [`storage::superblock`] — the catalog file and the checkpoint/merge
//!   engine that folds the WAL into new blocks.
//!
//! [`Database`], [`Table`], and [`Transaction`] are a thin facade over that
//! core, intentionally simple (see the crate's design notes): `open`/
//! `create`, table handles, and transactional `put`/`get`/`delete`/`exists`.
//!
//! Concurrent multi-writer access, multi-process access, a network
//! protocol, secondary indexes, and cross-block range scans are explicitly
//! out of scope — this is an embedded library, not a database server.

pub mod config;
pub mod db;
pub mod error;
pub mod storage;
pub mod table;
pub mod txn;

pub use config::Config;
pub use db::Database;
pub use error::{DbError, Result};
pub use table::Table;
pub use txn::Transaction;
