//! Write-ahead log: a single append-only file of framed records recording
//! transaction boundaries, table puts/deletes, catalog changes, and
//! superblock id-allocation checkpoints.
//!
//! `RecLogger` only knows how to append and sequentially read frames; it has
//! no notion of "the current state of the database" and does not buffer or
//! interpret records beyond decoding their payload. Replay (tracking which
//! transactions committed, applying buffered `LOGR` records on commit,
//! deciding when corruption is fatal vs. a normal truncated tail) is the
//! superblock layer's job, per [`crate::storage::superblock`].

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};
use crate::storage::codec::{read_frame, write_frame};
use crate::storage::record::{
    self, LogData, LogTable, SuperOp, TxnOp, LOGGER_MAGIC, TAG_LOG_DATA, TAG_LOG_TABLE,
    TAG_SUPER_OP, TAG_TXN_ABORT, TAG_TXN_COMMIT, TAG_TXN_START,
};

/// A single decoded WAL record, tagged by what frame it came from.
#[derive(Debug, Clone)]
pub enum LogEntry {
    TxnStart(TxnOp),
    TxnCommit(TxnOp),
    TxnAbort(TxnOp),
    Data(LogData),
    Table(LogTable),
    Super(SuperOp),
}

pub fn log_file_name(log_id: u64) -> String {
    format!("log.{log_id:x}")
}

/// Append-only writer over a WAL file, plus a read cursor used for replay.
pub struct RecLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    reader: Option<File>,
}

impl RecLogger {
    /// Create a brand-new, empty log file and open it for appending.
    pub fn create(dir: &Path, log_id: u64) -> Result<Self> {
        let path = dir.join(log_file_name(log_id));
        let mut f = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        f.write_all(&LOGGER_MAGIC)?;
        f.flush()?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(f)),
            reader: None,
        })
    }

    /// Open an existing log file for appending (new writes land after the
    /// last byte currently on disk).
    pub fn open_append(dir: &Path, log_id: u64) -> Result<Self> {
        let path = dir.join(log_file_name(log_id));
        let mut f = OpenOptions::new().write(true).open(&path)?;
        f.seek(SeekFrom::End(0))?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(f)),
            reader: None,
        })
    }

    /// Open an existing log file read-only, positioned just after the
    /// header, ready for [`RecLogger::read`].
    pub fn open_read(dir: &Path, log_id: u64) -> Result<Self> {
        let path = dir.join(log_file_name(log_id));
        let mut f = OpenOptions::new().read(true).open(&path)?;
        let mut magic = [0u8; 8];
        f.read_exact_compat(&mut magic)?;
        if magic != LOGGER_MAGIC {
            return Err(DbError::Corruption(format!(
                "{}: bad log magic",
                path.display()
            )));
        }
        Ok(Self {
            path,
            writer: None,
            reader: Some(f),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer_mut(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| DbError::InvalidOperation("log not open for append".to_string()))
    }

    pub fn txn_begin(&mut self, txn_id: u64) -> Result<()> {
        let payload = record::encode(&TxnOp { txn_id })?;
        write_frame(self.writer_mut()?, &TAG_TXN_START, &payload)
    }

    pub fn txn_commit(&mut self, txn_id: u64) -> Result<()> {
        let payload = record::encode(&TxnOp { txn_id })?;
        write_frame(self.writer_mut()?, &TAG_TXN_COMMIT, &payload)
    }

    pub fn txn_abort(&mut self, txn_id: u64) -> Result<()> {
        let payload = record::encode(&TxnOp { txn_id })?;
        write_frame(self.writer_mut()?, &TAG_TXN_ABORT, &payload)
    }

    pub fn data(&mut self, rec: &LogData) -> Result<()> {
        let payload = record::encode(rec)?;
        write_frame(self.writer_mut()?, &TAG_LOG_DATA, &payload)
    }

    pub fn tableop(&mut self, rec: &LogTable) -> Result<()> {
        let payload = record::encode(rec)?;
        write_frame(self.writer_mut()?, &TAG_LOG_TABLE, &payload)
    }

    pub fn superop(&mut self, rec: &SuperOp) -> Result<()> {
        let payload = record::encode(rec)?;
        write_frame(self.writer_mut()?, &TAG_SUPER_OP, &payload)
    }

    /// Flush buffered writes and fsync the underlying file. A transaction is
    /// not durable until this returns.
    pub fn sync(&mut self) -> Result<()> {
        let w = self.writer_mut()?;
        w.flush()?;
        w.get_ref().sync_data()?;
        Ok(())
    }

    /// Read and decode the next frame. Returns `Ok(None)` at end-of-log,
    /// whether that end is clean or a crash-truncated tail frame.
    pub fn read(&mut self) -> Result<Option<LogEntry>> {
        let f = self
            .reader
            .as_mut()
            .ok_or_else(|| DbError::InvalidOperation("log not open for read".to_string()))?;
        let Some((tag, payload)) = read_frame(f)? else {
            return Ok(None);
        };
        let entry = match tag {
            TAG_TXN_START => LogEntry::TxnStart(record::decode(&payload)?),
            TAG_TXN_COMMIT => LogEntry::TxnCommit(record::decode(&payload)?),
            TAG_TXN_ABORT => LogEntry::TxnAbort(record::decode(&payload)?),
            TAG_LOG_DATA => LogEntry::Data(record::decode(&payload)?),
            TAG_LOG_TABLE => LogEntry::Table(record::decode(&payload)?),
            TAG_SUPER_OP => LogEntry::Super(record::decode(&payload)?),
            other => {
                return Err(DbError::Corruption(format!(
                    "unrecognized WAL frame tag {other:?}"
                )))
            }
        };
        Ok(Some(entry))
    }

    /// Rewind the read cursor to just after the header, for a full replay
    /// from the start of the log.
    pub fn readreset(&mut self) -> Result<()> {
        let f = self
            .reader
            .as_mut()
            .ok_or_else(|| DbError::InvalidOperation("log not open for read".to_string()))?;
        f.seek(SeekFrom::Start(8))?;
        Ok(())
    }
}

/// `std::io::Read::read_exact` pulled in as a trait-free helper so
/// `RecLogger::open_read` doesn't need a `use std::io::Read` just for one
/// call site that also touches `Seek`.
trait ReadExactCompat {
    fn read_exact_compat(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

impl ReadExactCompat for File {
    fn read_exact_compat(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        use std::io::Read;
        self.read_exact(buf)
    }
}
