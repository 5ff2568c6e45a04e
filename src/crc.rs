//! Incremental CRC-32 as used by PNG chunks
//!
//! A chunk CRC covers the 4-byte type followed by the data. The three-phase
//! interface lets the writer hash both spans without concatenating them:
//!
//! ```
//! use image_meta_io::crc::{crc32, PartialCrc};
//!
//! let state = PartialCrc::start(b"IEND");
//! let state = PartialCrc::continue_crc(state, b"");
//! assert_eq!(PartialCrc::finish(state), crc32(b"IEND"));
//! assert_eq!(crc32(b"IEND"), 0xAE42_6082);
//! ```

const POLYNOMIAL: u32 = 0xEDB8_8320;

static CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            if c & 1 != 0 {
                c = POLYNOMIAL ^ (c >> 1);
            } else {
                c >>= 1;
            }
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

fn update(mut crc: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        crc = CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Start/continue/finish CRC-32 computation.
///
/// The intermediate state is a plain `u32` so it can be threaded through
/// any number of spans.
pub struct PartialCrc;

impl PartialCrc {
    /// Begin a CRC over the first span.
    pub fn start(bytes: &[u8]) -> u32 {
        update(0xFFFF_FFFF, bytes)
    }

    /// Extend a running CRC with another span.
    pub fn continue_crc(crc: u32, bytes: &[u8]) -> u32 {
        update(crc, bytes)
    }

    /// Produce the final CRC value.
    pub fn finish(crc: u32) -> u32 {
        crc ^ 0xFFFF_FFFF
    }
}

/// One-shot CRC-32 over a single span.
pub fn crc32(bytes: &[u8]) -> u32 {
    PartialCrc::finish(PartialCrc::start(bytes))
}

/// CRC of a PNG chunk: type followed by data.
pub fn chunk_crc(chunk_type: &[u8], data: &[u8]) -> u32 {
    PartialCrc::finish(PartialCrc::continue_crc(PartialCrc::start(chunk_type), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for split in [0, 1, 4, 13, 999, 1000] {
            let (a, b) = data.split_at(split);
            let partial = PartialCrc::finish(PartialCrc::continue_crc(PartialCrc::start(a), b));
            assert_eq!(partial, crc32(&data), "split at {split}");
        }
    }

    #[test]
    fn test_empty_spans() {
        let state = PartialCrc::start(b"");
        let state = PartialCrc::continue_crc(state, b"");
        assert_eq!(PartialCrc::finish(state), 0);
        assert_eq!(chunk_crc(b"tEXt", b""), crc32(b"tEXt"));
    }
}
