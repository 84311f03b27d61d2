//! In-memory accumulator of `(lid, payload)` entries, the unit that gets
//! framed, compressed, and written to a segment's `.dat` file by
//! [`crate::chunk_format`].

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::config::CompressionConfig;
use crate::error::Result;
use crate::lid::Lid;

const ENTRY_HEADER: usize = 8; // u32 lid + u32 payload len
const TRAILER: usize = 8; // u64 last_serial

/// One record inside a `Chunk`'s buffer: `size` includes the 8-byte
/// per-entry framing, `offset` is the byte offset of that framing within
/// the buffer.
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    pub lid: Lid,
    pub size: u32,
    pub offset: usize,
}

impl Entry {
    pub fn net_size(&self) -> u32 {
        self.size - ENTRY_HEADER as u32
    }
    pub fn net_offset(&self) -> usize {
        self.offset + ENTRY_HEADER
    }
}

/// Returned by [`Chunk::append`].
#[derive(Clone, Copy, Debug)]
pub struct LidMeta {
    pub lid: Lid,
    pub size: u32,
}

/// A growing buffer of framed `(lid, len, payload)` records plus a trailing
/// `lastSerial`. Capacity for both the byte buffer and the entry list is
/// reserved up front and never grown past the first append, so a reader
/// holding a pointer into `data` is never invalidated by a concurrent
/// append to a later slot.
pub struct Chunk {
    id: u32,
    data: Vec<u8>,
    entries: Vec<Entry>,
    last_serial: u64,
    max_bytes: usize,
}

impl Chunk {
    pub fn new(id: u32, max_bytes: usize) -> Self {
        let entry_capacity = (max_bytes / ENTRY_HEADER).max(1);
        Self {
            id,
            data: Vec::with_capacity(max_bytes),
            entries: Vec::with_capacity(entry_capacity),
            last_serial: u64::MAX,
            max_bytes,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn last_serial(&self) -> u64 {
        self.last_serial
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// There is always room for the first entry. After that, room exists
    /// only if appending `len` more bytes plus header/trailer would not
    /// force the backing buffer (or the entry list) to reallocate.
    pub fn has_room(&self, len: usize) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let would_need = self.data.len() + ENTRY_HEADER + TRAILER + len;
        would_need <= self.data.capacity() && (self.entries.len() + 1) <= self.entries.capacity()
    }

    pub fn append(&mut self, lid: Lid, buf: &[u8]) -> LidMeta {
        let offset = self.data.len();
        let mut header = [0u8; ENTRY_HEADER];
        BigEndian::write_u32(&mut header[0..4], lid);
        BigEndian::write_u32(&mut header[4..8], buf.len() as u32);
        self.data.extend_from_slice(&header);
        self.data.extend_from_slice(buf);
        let size = (ENTRY_HEADER + buf.len()) as u32;
        self.entries.push(Entry { lid, size, offset });
        LidMeta {
            lid,
            size: buf.len() as u32,
        }
    }

    /// Returns the payload of the *last* entry written for `lid`, if any —
    /// a chunk may receive several writes to the same lid before rotation,
    /// and the most recent one is authoritative.
    pub fn read(&self, lid: Lid) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.lid == lid)
            .map(|e| &self.data[e.net_offset()..e.net_offset() + e.net_size() as usize])
    }

    /// Deduplicated entries, keeping each lid's most recent write.
    /// One entry per distinct lid, keeping the last write to it, in the
    /// lid's last-occurrence order within this chunk (not hashmap order) —
    /// callers like `FileChunk::visit_all` rely on this to preserve
    /// append order, e.g. bucket-ordered compaction output.
    pub fn unique_entries(&self) -> Vec<Entry> {
        let mut last_index: HashMap<Lid, usize> = HashMap::with_capacity(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            last_index.insert(e.lid, i);
        }
        let mut positions: Vec<usize> = last_index.into_values().collect();
        positions.sort_unstable();
        positions.into_iter().map(|i| self.entries[i]).collect()
    }

    pub fn payload_of(&self, e: &Entry) -> &[u8] {
        &self.data[e.net_offset()..e.net_offset() + e.net_size() as usize]
    }

    /// Upper bound on the packed (framed, uncompressed) size of this chunk.
    pub fn max_pack_size(&self, _compression: CompressionConfig) -> usize {
        self.data.len() + TRAILER + crate::chunk_format::MAX_FRAME_OVERHEAD
    }

    /// Serialize the uncompressed payload (entries + trailing serial) and
    /// hand it to [`crate::chunk_format::pack`] for framing/compression.
    pub fn pack(&mut self, last_serial: u64, compression: CompressionConfig) -> Result<Vec<u8>> {
        self.last_serial = last_serial;
        let mut payload = Vec::with_capacity(self.data.len() + TRAILER);
        payload.extend_from_slice(&self.data);
        let mut trailer = [0u8; TRAILER];
        BigEndian::write_u64(&mut trailer, last_serial);
        payload.extend_from_slice(&trailer);
        crate::chunk_format::pack(&payload, compression)
    }

    /// Reconstruct a `Chunk` from a decoded, uncompressed payload (the
    /// inverse of the encoding `pack` produces): `repeat { lid, len, bytes }`
    /// followed by a trailing `u64` serial.
    pub fn from_payload(id: u32, payload: &[u8]) -> Result<Self> {
        use crate::error::StoreError;
        if payload.len() < TRAILER {
            return Err(StoreError::corruption("chunk payload shorter than trailer"));
        }
        let body_len = payload.len() - TRAILER;
        let mut entries = Vec::new();
        let mut pos = 0usize;
        while pos < body_len {
            if pos + ENTRY_HEADER > body_len {
                return Err(StoreError::corruption("truncated chunk entry header"));
            }
            let lid = BigEndian::read_u32(&payload[pos..pos + 4]);
            let len = BigEndian::read_u32(&payload[pos + 4..pos + 8]) as usize;
            if pos + ENTRY_HEADER + len > body_len {
                return Err(StoreError::corruption("truncated chunk entry payload"));
            }
            entries.push(Entry {
                lid,
                size: (ENTRY_HEADER + len) as u32,
                offset: pos,
            });
            pos += ENTRY_HEADER + len;
        }
        let last_serial = BigEndian::read_u64(&payload[body_len..body_len + TRAILER]);
        Ok(Self {
            id,
            data: payload[..body_len].to_vec(),
            entries,
            last_serial,
            max_bytes: body_len,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
