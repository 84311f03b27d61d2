//! On-disk framing for a packed [`crate::chunk::Chunk`]: version byte,
//! compression metadata, the (possibly compressed) payload, and a checksum.
//!
//! Two frame versions exist, mirroring the original store's migration from a
//! bare CRC32 frame to a magic-prefixed, XXH32-checksummed one. The version
//! byte always comes first so a reader can dispatch before looking at
//! anything else:
//!
//! * V1 (`version=0`) — `version(u8) | codec(u8) | uncompressedLen(u32) |
//!   payload | crc32(u32)`, CRC over everything preceding it.
//! * V2 (`version=1`) — `version(u8) | magic(u32) | serializedSize(u32) |
//!   codec(u8) | uncompressedLen(u32) | payload | xxh32(u32)`, same CRC
//!   scope, XXH32 instead of CRC32. `serializedSize` is the total frame
//!   length including the trailing checksum, so a reader never needs a
//!   separate compressed-payload-length field — the payload runs from the
//!   end of the header to `serializedSize - 4`.
//!
//! Neither version carries an explicit compressed-payload length: the
//! caller always knows the total frame length up front (it's the `size`
//! field of the chunk's index record), so payload length is derived by
//! subtracting header and checksum overhead from that.
//!
//! `pack` always emits V2; `unpack` dispatches on the leading version byte.

use byteorder::{BigEndian, ByteOrder};

use crate::codec;
use crate::config::{CompressionConfig, CompressionType};
use crate::error::{Result, StoreError};

pub const MAGIC: u32 = 0x5ba32de7;
const V1_VERSION: u8 = 0;
const V2_VERSION: u8 = 1;

/// Conservative upper bound on bytes added by framing, for callers sizing a
/// buffer before a worst-case (incompressible) pack.
pub const MAX_FRAME_OVERHEAD: usize = 1 + 4 + 4 + 1 + 4 + 4; // version+magic+serializedSize+codec+uncompressedLen+crc

pub struct Unpacked {
    pub bytes: Vec<u8>,
    pub codec: CompressionType,
}

/// Compress `payload` per `cfg` (falling back to `None` if compression
/// doesn't pay for itself) and frame it as a V2 record.
pub fn pack(payload: &[u8], cfg: CompressionConfig) -> Result<Vec<u8>> {
    let (codec, body) = codec::pack_with_fallback(payload, cfg)?;
    const HEAD: usize = 1 + 4 + 4 + 1 + 4;
    let serialized_size = (HEAD + body.len() + 4) as u32;
    let mut out = Vec::with_capacity(HEAD + body.len() + 4);
    let mut head = [0u8; HEAD];
    head[0] = V2_VERSION;
    BigEndian::write_u32(&mut head[1..5], MAGIC);
    BigEndian::write_u32(&mut head[5..9], serialized_size);
    head[9] = codec as u8;
    BigEndian::write_u32(&mut head[10..14], payload.len() as u32);
    out.extend_from_slice(&head);
    out.extend_from_slice(&body);
    let checksum = xxhash_rust::xxh32::xxh32(&out, 0);
    let mut crc_bytes = [0u8; 4];
    BigEndian::write_u32(&mut crc_bytes, checksum);
    out.extend_from_slice(&crc_bytes);
    Ok(out)
}

/// Decode a frame written by [`pack`] (V2) or the legacy V1 layout,
/// dispatching on the leading version byte.
///
/// `verify_checksum` controls whether a mismatching CRC/XXH32 is treated as
/// [`StoreError::Corruption`] — callers scanning a possibly-torn tail of an
/// `.idx`/`.dat` file pass `false` to distinguish "short read" from
/// "checksum mismatch" without paying for verification on the hot read path
/// twice.
pub fn unpack(frame: &[u8], verify_checksum: bool) -> Result<Unpacked> {
    match frame.first() {
        Some(&V1_VERSION) => unpack_v1(frame, verify_checksum),
        Some(&V2_VERSION) => unpack_v2(frame, verify_checksum),
        Some(&v) => Err(StoreError::corruption(format!("unsupported chunk frame version {v}"))),
        None => Err(StoreError::corruption("empty chunk frame")),
    }
}

fn unpack_v2(frame: &[u8], verify_checksum: bool) -> Result<Unpacked> {
    const HEAD: usize = 1 + 4 + 4 + 1 + 4;
    if frame.len() < HEAD + 4 {
        return Err(StoreError::corruption("chunk frame shorter than v2 header"));
    }
    let magic = BigEndian::read_u32(&frame[1..5]);
    if magic != MAGIC {
        return Err(StoreError::corruption("bad v2 chunk frame magic"));
    }
    let serialized_size = BigEndian::read_u32(&frame[5..9]) as usize;
    if serialized_size != frame.len() {
        return Err(StoreError::corruption("chunk frame length mismatch"));
    }
    let codec = CompressionType::from_u8(frame[9])
        .ok_or_else(|| StoreError::corruption(format!("unknown codec id {}", frame[9])))?;
    let uncompressed_len = BigEndian::read_u32(&frame[10..14]) as usize;
    let body_len = frame.len() - HEAD - 4;
    let body = &frame[HEAD..HEAD + body_len];
    let stored_crc = BigEndian::read_u32(&frame[HEAD + body_len..HEAD + body_len + 4]);
    if verify_checksum {
        let computed = xxhash_rust::xxh32::xxh32(&frame[..HEAD + body_len], 0);
        if computed != stored_crc {
            tracing::warn!(computed, stored_crc, "chunk frame xxh32 mismatch");
            return Err(StoreError::corruption("chunk frame xxh32 mismatch"));
        }
    }
    let bytes = codec::get(codec).decompress(body, uncompressed_len)?;
    Ok(Unpacked { bytes, codec })
}

fn unpack_v1(frame: &[u8], verify_checksum: bool) -> Result<Unpacked> {
    const HEAD: usize = 1 + 1 + 4;
    if frame.len() < HEAD + 4 {
        return Err(StoreError::corruption("chunk frame shorter than v1 header"));
    }
    let codec = CompressionType::from_u8(frame[1])
        .ok_or_else(|| StoreError::corruption(format!("unknown codec id {}", frame[1])))?;
    let uncompressed_len = BigEndian::read_u32(&frame[2..6]) as usize;
    let body_len = frame.len() - HEAD - 4;
    let body = &frame[HEAD..HEAD + body_len];
    let stored_crc = BigEndian::read_u32(&frame[HEAD + body_len..HEAD + body_len + 4]);
    if verify_checksum {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&frame[..HEAD + body_len]);
        let computed = hasher.finalize();
        if computed != stored_crc {
            tracing::warn!(computed, stored_crc, "chunk frame crc32 mismatch");
            return Err(StoreError::corruption("chunk frame crc32 mismatch"));
        }
    }
    let bytes = codec::get(codec).decompress(body, uncompressed_len)?;
    Ok(Unpacked { bytes, codec })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uncompressed() {
        let payload = b"some chunk bytes".to_vec();
        let framed = pack(&payload, CompressionConfig::none()).unwrap();
        let out = unpack(&framed, true).unwrap();
        assert_eq!(out.bytes, payload);
        assert_eq!(out.codec, CompressionType::None);
    }

    #[test]
    fn round_trips_lz4() {
        let payload = vec![7u8; 4096];
        let cfg = CompressionConfig {
            codec: CompressionType::Lz4,
            level: 1,
            min_gain: 0.0,
        };
        let framed = pack(&payload, cfg).unwrap();
        let out = unpack(&framed, true).unwrap();
        assert_eq!(out.bytes, payload);
        assert_eq!(out.codec, CompressionType::Lz4);
    }

    #[test]
    fn detects_checksum_corruption() {
        let payload = b"abc".to_vec();
        let mut framed = pack(&payload, CompressionConfig::none()).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert!(unpack(&framed, true).is_err());
    }

    #[test]
    fn skips_checksum_when_not_requested() {
        let payload = b"abc".to_vec();
        let mut framed = pack(&payload, CompressionConfig::none()).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert!(unpack(&framed, false).is_ok());
    }
}
