//! Level-meter telemetry decoding.
//!
//! The console answers a `/meters` poll with one binary blob: a 4-byte
//! header followed by packed 32-bit little-endian floats, one linear
//! level sample per metering point. The layout is fixed per meter bank;
//! for the `/meters/2` bank the main stereo output sits at float
//! offsets 16 (left) and 22 (right).

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Byte length of the blob header preceding the float array.
const HEADER_LEN: usize = 4;
/// Float-array offset of the main output left level.
const MAIN_LEFT_OFFSET: usize = 16;
/// Float-array offset of the main output right level.
const MAIN_RIGHT_OFFSET: usize = 22;
/// Floats required for the offsets above to be readable.
const MIN_FLOATS: usize = MAIN_RIGHT_OFFSET + 1;

/// A decoded meter snapshot for the main stereo output.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterFrame {
    /// Address of the meter bank the blob arrived on.
    pub address: String,
    /// Left main level in dB; `-inf` is the silence floor.
    pub left_db: f32,
    /// Right main level in dB.
    pub right_db: f32,
    /// Wall-clock receipt time, milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// Meter blob that cannot be decoded. Logged and dropped upstream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeterError {
    #[error("meter blob too short: {len} bytes, need {min}", min = HEADER_LEN + MIN_FLOATS * 4)]
    TooShort { len: usize },
}

/// Decode the main-output levels out of a `/meters/2` blob.
pub fn decode_main_levels(address: &str, blob: &[u8]) -> Result<MeterFrame, MeterError> {
    if blob.len() < HEADER_LEN + MIN_FLOATS * 4 {
        return Err(MeterError::TooShort { len: blob.len() });
    }

    let left = read_sample(blob, MAIN_LEFT_OFFSET);
    let right = read_sample(blob, MAIN_RIGHT_OFFSET);

    Ok(MeterFrame {
        address: address.to_string(),
        left_db: linear_to_db(left),
        right_db: linear_to_db(right),
        timestamp_ms: now_ms(),
    })
}

/// Read the little-endian float at the given array offset.
fn read_sample(blob: &[u8], offset: usize) -> f32 {
    let at = HEADER_LEN + offset * 4;
    f32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]])
}

/// Convert a linear sample (1.0 = 0 dB) to decibels. Non-positive
/// samples map to the `-inf` silence floor rather than NaN.
pub fn linear_to_db(sample: f32) -> f32 {
    if sample <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * sample.log10()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a blob with the given samples at the main L/R offsets and
    /// zeros elsewhere.
    fn make_blob(left: f32, right: f32) -> Vec<u8> {
        let mut floats = vec![0.0f32; MIN_FLOATS];
        floats[MAIN_LEFT_OFFSET] = left;
        floats[MAIN_RIGHT_OFFSET] = right;

        let mut blob = vec![0u8; HEADER_LEN];
        for f in floats {
            blob.extend_from_slice(&f.to_le_bytes());
        }
        blob
    }

    #[test]
    fn test_full_scale_is_zero_db_and_half_is_minus_six() {
        let frame = decode_main_levels("/meters/2", &make_blob(1.0, 0.5)).unwrap();
        assert_eq!(frame.address, "/meters/2");
        assert_eq!(frame.left_db, 0.0);
        // 20*log10(0.5)
        assert!((frame.right_db - -6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_silence_maps_to_negative_infinity() {
        let frame = decode_main_levels("/meters/2", &make_blob(0.0, -0.25)).unwrap();
        assert_eq!(frame.left_db, f32::NEG_INFINITY);
        assert_eq!(frame.right_db, f32::NEG_INFINITY);
    }

    #[test]
    fn test_short_blob_is_an_error_not_a_panic() {
        let blob = make_blob(1.0, 1.0);
        let err = decode_main_levels("/meters/2", &blob[..40]).unwrap_err();
        assert_eq!(err, MeterError::TooShort { len: 40 });
        assert_eq!(
            decode_main_levels("/meters/2", &[]).unwrap_err(),
            MeterError::TooShort { len: 0 }
        );
    }

    #[test]
    fn test_known_byte_sequence_decodes_to_literal_values() {
        // 0.1 linear is -20 dB exactly in the 20*log10 convention
        let frame = decode_main_levels("/meters/2", &make_blob(0.1, 0.01)).unwrap();
        assert!((frame.left_db - -20.0).abs() < 1e-4);
        assert!((frame.right_db - -40.0).abs() < 1e-4);
    }
}
