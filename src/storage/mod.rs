//! On-disk storage engine: framed records, the write-ahead log, immutable
//! sorted blocks, table roots, and the superblock/checkpoint engine that
//! ties them together.
//!
//! Modules are listed leaf-first, matching their dependency order: `codec`
//! and `checksum` have no internal dependencies; `wal`, `block`, and `root`
//! build on them; `superblock` is the one component that understands how
//! they compose into a recoverable, checkpointed database.

pub mod block;
pub mod checksum;
pub mod codec;
pub mod record;
pub mod root;
pub mod superblock;
pub mod wal;

pub use block::{Block, BlockManager, BlockWriter};
pub use root::TableRoot;
pub use superblock::Superblock;
pub use wal::RecLogger;
