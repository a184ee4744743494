//! IEEE CRC32 over frame bytes, via `crc32fast` (SSE4.2/PCLMULQDQ accelerated where available).

use crc32fast::Hasher;

/// One-shot CRC32 (IEEE 802.3 polynomial) of `data`.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    let mut h = Hasher::new();
    h.update(data);
    h.finalize()
}

/// Incremental CRC32 accumulator, used by the block writer to run a checksum
/// over an entire file as frames are appended rather than re-hashing on close.
#[derive(Default)]
pub struct RunningCrc(Hasher);

impl RunningCrc {
    pub fn new() -> Self {
        Self(Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_value() {
        // IEEE CRC32 of "123456789" is the standard check value 0xCBF43926.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn running_matches_one_shot() {
        let mut running = RunningCrc::new();
        running.update(b"abc");
        running.update(b"def");
        assert_eq!(running.finalize(), crc32(b"abcdef"));
    }
}
