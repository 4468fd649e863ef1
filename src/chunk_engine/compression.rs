//! Per-chunk compression (spec.md §4.2). In practice, since the canonical
//! chunk size never exceeds 512 bytes, this path rarely triggers — it is
//! kept so that the wire's `compression_applied` flag and `compression_type`
//! remain honored whenever a chunk does cross the threshold.

use crate::codec::manifest::CompressionType;
use crate::constants::{COMPRESSION_MIN_SAVINGS_PCT, COMPRESSION_THRESHOLD_BYTES};
use crate::error::DecodeError;

const DEFLATE_LEVEL: u8 = 6;

/// Attempt compression if `payload` is above the threshold and the
/// transfer's declared codec isn't `None`. Returns the bytes to put on the
/// wire and whether they are compressed — compression is kept only if it
/// reduces size by at least `COMPRESSION_MIN_SAVINGS_PCT`.
pub fn compress_if_worthwhile(payload: &[u8], codec: CompressionType) -> (Vec<u8>, bool) {
    if payload.len() <= COMPRESSION_THRESHOLD_BYTES || codec == CompressionType::None {
        return (payload.to_vec(), false);
    }

    let compressed = match codec {
        CompressionType::Lz4 | CompressionType::Gzip => {
            miniz_oxide::deflate::compress_to_vec(payload, DEFLATE_LEVEL)
        }
        CompressionType::None => unreachable!("checked above"),
    };

    let savings_pct = 100 * (payload.len().saturating_sub(compressed.len())) / payload.len();
    if savings_pct >= COMPRESSION_MIN_SAVINGS_PCT as usize {
        (compressed, true)
    } else {
        (payload.to_vec(), false)
    }
}

/// Inverse of the compressed branch of `compress_if_worthwhile`.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    miniz_oxide::inflate::decompress_to_vec(bytes).map_err(|_| DecodeError::InvalidEnumValue {
        field: "compressed_payload",
        value: 0,
    })
}
