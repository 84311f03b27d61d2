//! Compressor implementations selected by [`crate::config::CompressionType`],
//! adapted from `arx-core`'s `codec` module (`Store`/`ZstdCompressor`) with an
//! LZ4 codec added for the chunk frame's `LZ4` compression type.

use std::io::{Read, Write};

use crate::config::CompressionType;
use crate::error::{Result, StoreError};

pub trait Compressor: Send + Sync {
    fn id(&self) -> CompressionType;
    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>>;
    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> Result<Vec<u8>>;
}

pub struct Store;

impl Compressor for Store {
    fn id(&self) -> CompressionType {
        CompressionType::None
    }
    fn compress(&self, src: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }
    fn decompress(&self, src: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }
}

pub struct Lz4Codec;

impl Compressor for Lz4Codec {
    fn id(&self) -> CompressionType {
        CompressionType::Lz4
    }
    fn compress(&self, src: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(src))
    }
    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        lz4_flex::block::decompress(src, uncompressed_len)
            .map_err(|e| StoreError::corruption(format!("lz4 decompress: {e}")))
    }
}

pub struct ZstdCodec;

impl Compressor for ZstdCodec {
    fn id(&self) -> CompressionType {
        CompressionType::Zstd
    }
    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut enc = zstd::stream::Encoder::new(&mut out, level.max(1))
                .map_err(|e| StoreError::io("<zstd encoder>", e))?;
            std::io::copy(&mut &src[..], &mut enc).map_err(|e| StoreError::io("<zstd>", e))?;
            enc.finish().map_err(|e| StoreError::io("<zstd>", e))?;
        }
        Ok(out)
    }
    fn decompress(&self, src: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(uncompressed_len);
        let mut dec =
            zstd::stream::Decoder::new(src).map_err(|e| StoreError::io("<zstd decoder>", e))?;
        dec.read_to_end(&mut out)
            .map_err(|e| StoreError::io("<zstd>", e))?;
        Ok(out)
    }
}

pub fn get(codec: CompressionType) -> &'static dyn Compressor {
    match codec {
        CompressionType::None => &Store,
        CompressionType::Lz4 => &Lz4Codec,
        CompressionType::Zstd => &ZstdCodec,
    }
}

/// Returns `true` if compressing `uncompressed` into `compressed` bytes saves
/// at least `min_gain` of the original size — mirrors `arx-core::pack`'s
/// `should_compress` trial-compression heuristic.
pub fn worth_compressing(uncompressed: usize, compressed: usize, min_gain: f32) -> bool {
    (uncompressed as f64 - compressed as f64) >= (uncompressed as f64 * min_gain as f64)
}

/// Pack `payload` under `cfg`, falling back to `None` if the requested codec
/// doesn't pay for itself. Returns `(actual_codec, bytes)`.
pub fn pack_with_fallback(
    payload: &[u8],
    cfg: crate::config::CompressionConfig,
) -> Result<(CompressionType, Vec<u8>)> {
    if matches!(cfg.codec, CompressionType::None) {
        return Ok((CompressionType::None, payload.to_vec()));
    }
    let compressor = get(cfg.codec);
    let compressed = compressor.compress(payload, cfg.level)?;
    if worth_compressing(payload.len(), compressed.len(), cfg.min_gain) {
        Ok((cfg.codec, compressed))
    } else {
        Ok((CompressionType::None, payload.to_vec()))
    }
}

pub fn write_all(w: &mut dyn Write, bytes: &[u8]) -> Result<()> {
    w.write_all(bytes)
        .map_err(|e| StoreError::io("<buffer>", e))
}
