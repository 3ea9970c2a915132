//! Calldata run-length compression compatible with Solady's `LibZip.cdCompress`.
//!
//! Zero runs become `0x00, n-1` (up to 128 bytes per run), `0xff` runs become
//! `0x00, 0x80 | (n-1)` (up to 32 bytes per run) and every other byte is copied.
//! The first four output bytes are negated so the function selector of the
//! compressed call never collides with the raw one.

use crate::domain::AppError;

const MAX_ZERO_RUN: usize = 0x80;
const MAX_FF_RUN: usize = 0x20;
const NEGATED_PREFIX: usize = 4;

struct RunEncoder {
    out: Vec<u8>,
    zeros: usize,
    ones: usize,
}

impl RunEncoder {
    fn flush_zeros(&mut self) {
        if self.zeros > 0 {
            self.out.extend_from_slice(&[0x00, (self.zeros - 1) as u8]);
            self.zeros = 0;
        }
    }

    fn flush_ones(&mut self) {
        if self.ones > 0 {
            self.out
                .extend_from_slice(&[0x00, 0x80 | (self.ones - 1) as u8]);
            self.ones = 0;
        }
    }
}

/// Compress calldata.
#[must_use]
pub fn cd_compress(data: &[u8]) -> Vec<u8> {
    let mut enc = RunEncoder {
        out: Vec::with_capacity(data.len()),
        zeros: 0,
        ones: 0,
    };

    for &byte in data {
        match byte {
            0x00 => {
                enc.flush_ones();
                enc.zeros += 1;
                if enc.zeros == MAX_ZERO_RUN {
                    enc.flush_zeros();
                }
            }
            0xff => {
                enc.flush_zeros();
                enc.ones += 1;
                if enc.ones == MAX_FF_RUN {
                    enc.flush_ones();
                }
            }
            literal => {
                enc.flush_ones();
                enc.flush_zeros();
                enc.out.push(literal);
            }
        }
    }
    enc.flush_ones();
    enc.flush_zeros();

    let mut out = enc.out;
    for byte in out.iter_mut().take(NEGATED_PREFIX) {
        *byte = !*byte;
    }
    out
}

/// Inverse of [`cd_compress`].
pub fn cd_decompress(data: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut input = data.to_vec();
    for byte in input.iter_mut().take(NEGATED_PREFIX) {
        *byte = !*byte;
    }

    let mut out = Vec::with_capacity(input.len() * 2);
    let mut bytes = input.into_iter();
    while let Some(byte) = bytes.next() {
        if byte != 0x00 {
            out.push(byte);
            continue;
        }
        let marker = bytes.next().ok_or_else(|| {
            AppError::Serialization("Compressed calldata ends inside a run marker".to_string())
        })?;
        let len = usize::from(marker & 0x7f) + 1;
        let fill = if marker & 0x80 != 0 { 0xff } else { 0x00 };
        out.resize(out.len() + len, fill);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::hex;

    #[test]
    fn test_compress_known_vector() {
        // 12 | 00 00 00 | ff ff | 34  ->  12 00 02 00 81 34, first four negated
        let input = [0x12, 0x00, 0x00, 0x00, 0xff, 0xff, 0x34];
        assert_eq!(cd_compress(&input), vec![0xed, 0xff, 0xfd, 0xff, 0x81, 0x34]);
    }

    #[test]
    fn test_empty_input() {
        assert!(cd_compress(&[]).is_empty());
        assert!(cd_decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_zero_runs_split_at_128() {
        let input = vec![0u8; 130];
        let compressed = cd_compress(&input);
        // 00 7f | 00 01, with the first four bytes negated
        assert_eq!(compressed, vec![0xff, 0x80, 0xff, 0xfe]);
        assert_eq!(cd_decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn test_ff_runs_split_at_32() {
        let mut input = vec![0xaa; 4];
        input.extend(std::iter::repeat_n(0xff, 33));
        let compressed = cd_compress(&input);
        assert_eq!(&compressed[4..], &[0x00, 0x9f, 0x00, 0x80]);
        assert_eq!(cd_decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn test_abi_calldata_shrinks_and_restores() {
        // execute((address,(uint256,bytes))[]) style payload: mostly padding
        let calldata = hex::decode(concat!(
            "a1b2c3d4",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000001234567890123456789012345678901234567890",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        ))
        .unwrap();
        let compressed = cd_compress(&calldata);
        assert!(compressed.len() < calldata.len() / 2);
        assert_ne!(&compressed[..4], &calldata[..4]);
        assert_eq!(cd_decompress(&compressed).unwrap(), calldata);
    }

    #[test]
    fn test_short_outputs_are_fully_negated() {
        assert_eq!(cd_compress(&[0x01, 0x02]), vec![0xfe, 0xfd]);
        assert_eq!(cd_decompress(&[0xfe, 0xfd]).unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn test_truncated_marker_is_rejected() {
        // A lone 0x00 after un-negation
        let result = cd_decompress(&[0xff]);
        assert!(matches!(result, Err(AppError::Serialization(_))));
    }
}
