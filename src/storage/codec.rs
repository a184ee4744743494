//! Framed record codec: `<4-byte tag><u32 LE data_len><payload><u32 LE CRC32>`.
//!
//! The CRC covers the 8-byte header plus payload, not itself. A frame whose
//! declared `data_len` exceeds [`MAX_PAYLOAD_LEN`] is corrupt and rejected
//! outright. A frame that is present but short (truncated header, payload, or
//! trailer) is reported as [`None`] rather than an error: callers that expect
//! exactly one frame (superblock, table root) turn that into a hard failure
//! themselves, while the WAL reader treats it as ordinary end-of-log, since a
//! crash is permitted to leave a partially written trailing frame behind.

use std::io::Read;

use crate::error::{DbError, Result};
use crate::storage::checksum::crc32;

pub const TAG_LEN: usize = 4;
pub const HEADER_LEN: usize = TAG_LEN + 4;
pub const TRAILER_LEN: usize = 4;

/// Largest payload a single frame may declare, in bytes (16 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

pub type Tag = [u8; TAG_LEN];

/// Read as much of `buf` as is available from `r`, without treating a short
/// read or clean EOF as an error. Returns the number of bytes actually read.
fn read_best_effort<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DbError::from(e)),
        }
    }
    Ok(filled)
}

/// Encode `tag` and `payload` as a single frame: header, payload, CRC trailer.
pub fn encode_frame(tag: &Tag, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
        return Err(DbError::InvalidInput(format!(
            "frame payload of {} bytes exceeds {} byte cap",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Write a single frame to `w`.
pub fn write_frame<W: std::io::Write>(w: &mut W, tag: &Tag, payload: &[u8]) -> Result<()> {
    let buf = encode_frame(tag, payload)?;
    w.write_all(&buf)?;
    Ok(())
}

/// Read and validate a single frame from a stream.
///
/// Returns `Ok(None)` on a clean or truncated end-of-stream. Returns
/// `Err` if a fully-present frame fails its CRC, or declares an
/// over-sized payload.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<(Tag, Vec<u8>)>> {
    let mut header = [0u8; HEADER_LEN];
    let n = read_best_effort(r, &mut header)?;
    if n < HEADER_LEN {
        return Ok(None);
    }

    let mut tag: Tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&header[..TAG_LEN]);
    let data_len = u32::from_le_bytes(header[TAG_LEN..HEADER_LEN].try_into().unwrap());
    if data_len > MAX_PAYLOAD_LEN {
        return Err(DbError::Corruption(format!(
            "frame declares {data_len} byte payload, exceeds {MAX_PAYLOAD_LEN} byte cap"
        )));
    }

    let mut payload = vec![0u8; data_len as usize];
    let np = read_best_effort(r, &mut payload)?;
    if np < payload.len() {
        return Ok(None);
    }

    let mut trailer = [0u8; TRAILER_LEN];
    let nt = read_best_effort(r, &mut trailer)?;
    if nt < TRAILER_LEN {
        return Ok(None);
    }

    let want_crc = u32::from_le_bytes(trailer);
    let mut hashed = Vec::with_capacity(HEADER_LEN + payload.len());
    hashed.extend_from_slice(&header);
    hashed.extend_from_slice(&payload);
    if crc32(&hashed) != want_crc {
        return Err(DbError::Corruption("frame CRC32 mismatch".to_string()));
    }

    Ok(Some((tag, payload)))
}

/// Parse a single frame out of an in-memory slice, for callers (block files,
/// table roots) that hold the whole backing file mapped.
///
/// Returns `Ok(None)` if `buf` does not contain a complete frame.
/// On success, returns the tag, the payload slice borrowed from `buf`, and
/// the total number of bytes the frame occupied.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Tag, &[u8], usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut tag: Tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&buf[..TAG_LEN]);
    let data_len = u32::from_le_bytes(buf[TAG_LEN..HEADER_LEN].try_into().unwrap());
    if data_len > MAX_PAYLOAD_LEN {
        return Err(DbError::Corruption(format!(
            "frame declares {data_len} byte payload, exceeds {MAX_PAYLOAD_LEN} byte cap"
        )));
    }
    let total = HEADER_LEN + data_len as usize + TRAILER_LEN;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[HEADER_LEN..HEADER_LEN + data_len as usize];
    let want_crc = u32::from_le_bytes(
        buf[HEADER_LEN + data_len as usize..total]
            .try_into()
            .unwrap(),
    );
    if crc32(&buf[..HEADER_LEN + data_len as usize]) != want_crc {
        return Err(DbError::Corruption("frame CRC32 mismatch".to_string()));
    }
    Ok(Some((tag, payload, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_stream() {
        let tag = *b"TEST";
        let buf = encode_frame(&tag, b"hello world").unwrap();
        let mut cur = Cursor::new(buf);
        let (got_tag, payload) = read_frame(&mut cur).unwrap().unwrap();
        assert_eq!(got_tag, tag);
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn round_trip_slice() {
        let tag = *b"TEST";
        let buf = encode_frame(&tag, b"hello world").unwrap();
        let (got_tag, payload, consumed) = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(got_tag, tag);
        assert_eq!(payload, b"hello world");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_flipped_byte() {
        let tag = *b"TEST";
        let mut buf = encode_frame(&tag, b"hello world").unwrap();
        let last = buf.len() - 5;
        buf[last] ^= 0xFF;
        let mut cur = Cursor::new(buf.clone());
        assert!(read_frame(&mut cur).is_err());
        assert!(parse_frame(&buf).is_err());
    }

    #[test]
    fn truncated_header_is_eof_not_error() {
        let mut cur = Cursor::new(vec![0u8; 3]);
        assert!(read_frame(&mut cur).unwrap().is_none());
    }

    #[test]
    fn truncated_trailing_frame_is_eof_not_error() {
        let tag = *b"TEST";
        let mut buf = encode_frame(&tag, b"hello world").unwrap();
        buf.truncate(buf.len() - 2);
        let mut cur = Cursor::new(buf.clone());
        assert!(read_frame(&mut cur).unwrap().is_none());
        assert!(parse_frame(&buf).unwrap().is_none());
    }

    #[test]
    fn oversized_payload_declared_is_error() {
        let mut header = Vec::new();
        header.extend_from_slice(b"TEST");
        header.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let mut cur = Cursor::new(header.clone());
        assert!(read_frame(&mut cur).is_err());
        assert!(parse_frame(&header).is_err());
    }
}
