//! Chunk codec
//!
//! A chunk is `base64( crc32_le(payload) ‖ payload )` where the payload is
//! a window of the MessagePack frame stream. The base64 alphabet keeps the
//! result a plain character string for the host KV; the CRC turns silent
//! slot corruption into a detectable decode failure.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{Error, Limits, Result};
use thiserror::Error as ThisError;

const CRC_LEN: usize = 4;

/// Why a chunk failed to decode.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ChunkError {
    /// Not valid base64.
    #[error("chunk is not valid base64: {0}")]
    BadEncoding(String),

    /// Shorter than the checksum header.
    #[error("chunk of {0} bytes is too short to carry a checksum")]
    TooShort(usize),

    /// Checksum mismatch.
    #[error("chunk checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    BadChecksum {
        /// CRC stored in the chunk header.
        stored: u32,
        /// CRC computed over the payload.
        computed: u32,
    },
}

/// Payload bytes a single chunk may carry under the slot cap.
///
/// Four base64 characters encode three payload bytes; the CRC header takes
/// its share out of the same budget.
pub fn payload_capacity(limits: &Limits) -> usize {
    (limits.max_slot_len / 4) * 3 - CRC_LEN
}

/// Frame and encode a payload window into a slot-sized string.
pub fn encode_chunk(payload: &[u8]) -> String {
    let crc = crc32fast::hash(payload);
    let mut framed = Vec::with_capacity(CRC_LEN + payload.len());
    framed.extend_from_slice(&crc.to_le_bytes());
    framed.extend_from_slice(payload);
    BASE64.encode(framed)
}

/// Decode and verify one chunk.
pub fn decode_chunk(text: &str) -> std::result::Result<Vec<u8>, ChunkError> {
    let framed = BASE64
        .decode(text)
        .map_err(|e| ChunkError::BadEncoding(e.to_string()))?;
    if framed.len() < CRC_LEN {
        return Err(ChunkError::TooShort(framed.len()));
    }
    let stored = u32::from_le_bytes(framed[..CRC_LEN].try_into().expect("four bytes"));
    let payload = framed[CRC_LEN..].to_vec();
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(ChunkError::BadChecksum { stored, computed });
    }
    Ok(payload)
}

/// Append one self-describing MessagePack frame to a byte stream.
pub fn write_frame<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    rmp_serde::encode::write_named(buf, value).map_err(|e| Error::Codec(e.to_string()))
}

/// Decode the next frame from a byte cursor, advancing it.
pub fn read_frame<T: DeserializeOwned>(cursor: &mut &[u8]) -> Result<T> {
    rmp_serde::decode::from_read(cursor).map_err(|e| Error::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        n: u32,
        s: String,
    }

    #[test]
    fn test_chunk_round_trip() {
        let payload = b"the payload".to_vec();
        let chunk = encode_chunk(&payload);
        assert_eq!(decode_chunk(&chunk).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let chunk = encode_chunk(&[]);
        assert_eq!(decode_chunk(&chunk).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_corruption_is_detected() {
        let chunk = encode_chunk(b"data that matters");
        // Flip one character somewhere past the CRC header
        let mut corrupted: Vec<char> = chunk.chars().collect();
        let at = corrupted.len() / 2;
        corrupted[at] = if corrupted[at] == 'A' { 'B' } else { 'A' };
        let corrupted: String = corrupted.into_iter().collect();
        match decode_chunk(&corrupted) {
            Err(ChunkError::BadChecksum { .. }) | Err(ChunkError::BadEncoding(_)) => {}
            other => panic!("corruption not detected: {other:?}"),
        }
    }

    #[test]
    fn test_not_base64() {
        assert!(matches!(
            decode_chunk("!!! not base64 !!!"),
            Err(ChunkError::BadEncoding(_))
        ));
    }

    #[test]
    fn test_too_short() {
        let text = BASE64.encode([1u8, 2]);
        assert_eq!(decode_chunk(&text), Err(ChunkError::TooShort(2)));
    }

    #[test]
    fn test_payload_capacity_respects_slot_cap() {
        let limits = Limits::with_max_slot_len(100);
        let capacity = payload_capacity(&limits);
        let chunk = encode_chunk(&vec![0u8; capacity]);
        assert!(chunk.len() <= 100, "chunk of {} chars over cap", chunk.len());
    }

    #[test]
    fn test_frame_stream_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Probe { n: 1, s: "a".into() }).unwrap();
        write_frame(&mut buf, &Probe { n: 2, s: "b".into() }).unwrap();
        let mut cursor = &buf[..];
        let first: Probe = read_frame(&mut cursor).unwrap();
        let second: Probe = read_frame(&mut cursor).unwrap();
        assert_eq!(first, Probe { n: 1, s: "a".into() });
        assert_eq!(second, Probe { n: 2, s: "b".into() });
        assert!(cursor.is_empty());
    }
}
