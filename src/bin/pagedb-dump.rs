//! `pagedb-dump`: inspect the raw frame sequence of a pagedb on-disk file.
//!
//! Given a path, sniffs the 8-byte magic and prints the file kind plus one
//! line per frame: block files, WAL segments, table roots, and the
//! superblock are all built from the same framed-record primitive, so one
//! small tool covers all four on-disk file kinds. This is a development aid
//! only, matching the shape of the original `dump.py` script — it carries
//! none of the crash-consistency or durability guarantees of the library
//! itself.

use std::env;
use std::process::ExitCode;

use pagedb::storage::codec::parse_frame;
use pagedb::storage::record::{
    self, LogData, LogTable, RootIdx, SuperOp, SuperblockRecord, TxnOp, BLOCK_MAGIC, LOGGER_MAGIC,
    ROOT_MAGIC, SUPER_MAGIC, TAG_LOG_DATA, TAG_LOG_TABLE, TAG_SUPER_OP, TAG_TXN_ABORT,
    TAG_TXN_COMMIT, TAG_TXN_START,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: pagedb-dump <path>");
        return ExitCode::FAILURE;
    };

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    if bytes.len() < 8 {
        eprintln!("{path}: too short to contain a magic header");
        return ExitCode::FAILURE;
    }
    let magic = &bytes[..8];

    let result = if magic == SUPER_MAGIC.as_slice() {
        dump_super(&path, &bytes)
    } else if magic == LOGGER_MAGIC.as_slice() {
        dump_log(&path, &bytes)
    } else if magic == BLOCK_MAGIC.as_slice() {
        dump_block(&path, &bytes)
    } else if magic == ROOT_MAGIC.as_slice() {
        dump_root(&path, &bytes)
    } else {
        eprintln!("{path}: unrecognized magic {magic:?}");
        return ExitCode::FAILURE;
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{path}: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dump_super(path: &str, bytes: &[u8]) -> Result<(), String> {
    println!("{path}: superblock");
    let (_, payload, _) = frame_at(bytes, 8)?;
    let rec: SuperblockRecord = record::decode(payload).map_err(|e| e.to_string())?;
    println!(
        "  SUPR version={} db_uuid={} log_id={:x} next_txn_id={} next_file_id={}",
        rec.version, rec.db_uuid, rec.log_id, rec.next_txn_id, rec.next_file_id
    );
    for t in &rec.tables {
        println!("    table {} uuid={} root_id={:x}", t.name, t.uuid, t.root_id);
    }
    for g in &rec.garbage {
        println!("    garbage file_id={g:x}");
    }
    Ok(())
}

fn dump_root(path: &str, bytes: &[u8]) -> Result<(), String> {
    println!("{path}: table root");
    let (_, payload, _) = frame_at(bytes, 8)?;
    let idx: RootIdx = record::decode(payload).map_err(|e| e.to_string())?;
    println!("  ROOT {} entries", idx.entries.len());
    for ent in &idx.entries {
        println!(
            "    last_key={:?} file_id={:x}",
            String::from_utf8_lossy(&ent.key),
            ent.file_id
        );
    }
    Ok(())
}

fn dump_log(path: &str, bytes: &[u8]) -> Result<(), String> {
    println!("{path}: WAL segment");
    let mut offset = 8;
    let mut n = 0;
    while offset < bytes.len() {
        match parse_frame(&bytes[offset..]).map_err(|e| e.to_string())? {
            None => {
                println!(
                    "  [{offset:>8}] (truncated tail, {} bytes left)",
                    bytes.len() - offset
                );
                break;
            }
            Some((tag, payload, consumed)) => {
                print!("  [{offset:>8}] ");
                print_log_frame(&tag, payload)?;
                offset += consumed;
                n += 1;
            }
        }
    }
    println!("  {n} frames");
    Ok(())
}

fn print_log_frame(tag: &[u8; 4], payload: &[u8]) -> Result<(), String> {
    match *tag {
        TAG_TXN_START => {
            let op: TxnOp = record::decode(payload).map_err(|e| e.to_string())?;
            println!("TXN  txn_id={}", op.txn_id);
        }
        TAG_TXN_COMMIT => {
            let op: TxnOp = record::decode(payload).map_err(|e| e.to_string())?;
            println!("TXNC txn_id={}", op.txn_id);
        }
        TAG_TXN_ABORT => {
            let op: TxnOp = record::decode(payload).map_err(|e| e.to_string())?;
            println!("TXNA txn_id={}", op.txn_id);
        }
        TAG_LOG_DATA => {
            let rec: LogData = record::decode(payload).map_err(|e| e.to_string())?;
            println!(
                "LOGR table={} txn_id={} {} key={:?}",
                rec.table,
                rec.txn_id,
                if rec.is_delete() { "del" } else { "put" },
                String::from_utf8_lossy(&rec.key)
            );
        }
        TAG_LOG_TABLE => {
            let rec: LogTable = record::decode(payload).map_err(|e| e.to_string())?;
            println!("LTBL tabname={} root_id={:x}", rec.tabname, rec.root_id);
        }
        TAG_SUPER_OP => {
            let op: SuperOp = record::decode(payload).map_err(|e| e.to_string())?;
            println!(
                "SUPR next_txn_id={} next_file_id={}",
                op.next_txn_id, op.next_file_id
            );
        }
        other => println!("??? tag={:?} ({} byte payload)", other, payload.len()),
    }
    Ok(())
}

fn dump_block(path: &str, bytes: &[u8]) -> Result<(), String> {
    println!("{path}: block file ({} bytes)", bytes.len());
    let mut offset = 8;
    let mut n_data = 0;
    while offset < bytes.len() {
        match parse_frame(&bytes[offset..]).map_err(|e| e.to_string())? {
            None => {
                println!(
                    "  [{offset:>8}] (trailer/truncated tail, {} bytes left)",
                    bytes.len() - offset
                );
                break;
            }
            Some((tag, payload, consumed)) => {
                match &tag {
                    b"DATA" => {
                        if payload.len() >= 8 {
                            let k_len =
                                u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
                            let v_len =
                                u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
                            let key = &payload[8..8 + k_len];
                            println!(
                                "  [{offset:>8}] DATA key={:?} v_len={v_len}",
                                String::from_utf8_lossy(key)
                            );
                        }
                        n_data += 1;
                    }
                    b"DIDX" => println!("  [{offset:>8}] DIDX {} bytes", payload.len()),
                    b"DTRL" => println!("  [{offset:>8}] DTRL {} bytes", payload.len()),
                    _ => println!("  [{offset:>8}] {:?} {} bytes", tag, payload.len()),
                }
                offset += consumed;
            }
        }
    }
    println!("  {n_data} DATA frames, {} bytes of trailing whole-file CRC", bytes.len() - offset);
    Ok(())
}

fn frame_at<'a>(bytes: &'a [u8], offset: usize) -> Result<([u8; 4], &'a [u8], usize), String> {
    parse_frame(&bytes[offset..])
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "truncated frame".to_string())
}
