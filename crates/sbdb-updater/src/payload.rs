//! Binary chunk payload decoding
//!
//! Shavar layout, repeated until the payload is consumed (`N` = hash size):
//!
//! ```text
//! add: [domain:N][count:1] [fragment:N]*count
//! sub: [domain:N][count:1] count == 0 ? [addchunk:4]
//!                                     : ([addchunk:4][fragment:N])*count
//! ```
//!
//! A zero count means the domain itself is the only fragment.
//! Digest layout (tables named `*-digest256`, `N` = 32):
//!
//! ```text
//! add: [hash:32]*
//! sub: ([addchunk:4][hash:32])*
//! ```
//!
//! Chunk numbers are big-endian.

use sbdb_core::constants::{COMPLETE_SIZE, PREFIX_SIZE};
use sbdb_core::{ChunkType, CompleteHash, Prefix, TableUpdate};

use crate::error::{ParseError, Result};

/// Chunk kind, number and hash width resolved against the current table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub kind: ChunkType,
    pub number: u32,
    pub hash_size: usize,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    chunk: u32,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], chunk: u32) -> Self {
        Self { data, pos: 0, chunk }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(ParseError::PayloadMismatch {
                chunk: self.chunk,
                reason: format!(
                    "needed {} bytes at offset {}, only {} left",
                    n,
                    self.pos,
                    self.data.len() - self.pos
                ),
            });
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Decode `payload` into `update`, recording the chunk number even when the
/// payload is empty
pub fn decode_chunk(spec: ChunkSpec, payload: &[u8], update: &mut TableUpdate) -> Result<()> {
    update.new_chunk(spec.kind, spec.number);
    let mut reader = Reader::new(payload, spec.number);

    match spec.kind {
        ChunkType::Add => decode_shavar_add(spec, &mut reader, update),
        ChunkType::Sub => decode_shavar_sub(spec, &mut reader, update),
        ChunkType::AddDigest => {
            while !reader.is_empty() {
                update.new_add_complete(spec.number, complete(&mut reader)?);
            }
            Ok(())
        }
        ChunkType::SubDigest => {
            while !reader.is_empty() {
                let add_chunk = reader.u32_be()?;
                update.new_sub_complete(spec.number, add_chunk, complete(&mut reader)?);
            }
            Ok(())
        }
    }
}

fn complete(reader: &mut Reader<'_>) -> Result<CompleteHash> {
    let mut hash = [0u8; COMPLETE_SIZE];
    hash.copy_from_slice(reader.take(COMPLETE_SIZE)?);
    Ok(CompleteHash(hash))
}

enum Fragment {
    Prefix(Prefix),
    Complete(CompleteHash),
}

/// Read one hash of the header's width (already validated as 4 or 32)
fn fragment(reader: &mut Reader<'_>, hash_size: usize) -> Result<Fragment> {
    if hash_size == PREFIX_SIZE {
        let mut prefix = [0u8; PREFIX_SIZE];
        prefix.copy_from_slice(reader.take(PREFIX_SIZE)?);
        Ok(Fragment::Prefix(Prefix(prefix)))
    } else {
        complete(reader).map(Fragment::Complete)
    }
}

fn decode_shavar_add(spec: ChunkSpec, reader: &mut Reader<'_>, update: &mut TableUpdate) -> Result<()> {
    let add = |update: &mut TableUpdate, frag: Fragment| match frag {
        Fragment::Prefix(p) => update.new_add_prefix(spec.number, p),
        Fragment::Complete(h) => update.new_add_complete(spec.number, h),
    };

    while !reader.is_empty() {
        let domain = fragment(reader, spec.hash_size)?;
        let count = reader.u8()?;
        if count == 0 {
            add(update, domain);
            continue;
        }
        for _ in 0..count {
            let frag = fragment(reader, spec.hash_size)?;
            add(update, frag);
        }
    }
    Ok(())
}

fn decode_shavar_sub(spec: ChunkSpec, reader: &mut Reader<'_>, update: &mut TableUpdate) -> Result<()> {
    let sub = |update: &mut TableUpdate, add_chunk: u32, frag: Fragment| match frag {
        Fragment::Prefix(p) => update.new_sub_prefix(spec.number, add_chunk, p),
        Fragment::Complete(h) => update.new_sub_complete(spec.number, add_chunk, h),
    };

    while !reader.is_empty() {
        let domain = fragment(reader, spec.hash_size)?;
        let count = reader.u8()?;
        if count == 0 {
            let add_chunk = reader.u32_be()?;
            sub(update, add_chunk, domain);
            continue;
        }
        for _ in 0..count {
            let add_chunk = reader.u32_be()?;
            let frag = fragment(reader, spec.hash_size)?;
            sub(update, add_chunk, frag);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ChunkType, number: u32, hash_size: usize) -> ChunkSpec {
        ChunkSpec { kind, number, hash_size }
    }

    #[test]
    fn test_add_domain_only_entry() {
        let mut update = TableUpdate::new("t");
        decode_chunk(spec(ChunkType::Add, 1, 4), b"abcd\x00", &mut update).unwrap();
        assert_eq!(update.add_prefixes.len(), 1);
        assert_eq!(update.add_prefixes[0].prefix, Prefix(*b"abcd"));
        assert_eq!(update.add_prefixes[0].chunk, 1);
    }

    #[test]
    fn test_add_with_fragments_skips_domain() {
        let mut update = TableUpdate::new("t");
        let payload = b"dddd\x02aaaabbbbeeee\x00";
        decode_chunk(spec(ChunkType::Add, 9, 4), payload, &mut update).unwrap();
        let prefixes: Vec<_> = update.add_prefixes.iter().map(|a| a.prefix).collect();
        assert_eq!(prefixes, vec![Prefix(*b"aaaa"), Prefix(*b"bbbb"), Prefix(*b"eeee")]);
    }

    #[test]
    fn test_sub_entries_reference_add_chunks() {
        let mut update = TableUpdate::new("t");
        let mut payload = b"dddd\x00".to_vec();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(b"eeee\x01");
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(b"ffff");
        decode_chunk(spec(ChunkType::Sub, 2, 4), &payload, &mut update).unwrap();

        assert_eq!(update.sub_prefixes.len(), 2);
        assert_eq!(update.sub_prefixes[0].add_chunk, 1);
        assert_eq!(update.sub_prefixes[0].prefix, Prefix(*b"dddd"));
        assert_eq!(update.sub_prefixes[1].add_chunk, 7);
        assert_eq!(update.sub_prefixes[1].prefix, Prefix(*b"ffff"));
        assert!(update.sub_chunks.contains(2));
    }

    #[test]
    fn test_complete_width_shavar() {
        let hash = CompleteHash::of_fragment("x.example/");
        let mut payload = hash.0.to_vec();
        payload.push(0);
        let mut update = TableUpdate::new("t");
        decode_chunk(spec(ChunkType::Add, 4, 32), &payload, &mut update).unwrap();
        assert_eq!(update.add_completes.len(), 1);
        assert_eq!(update.add_completes[0].hash, hash);
    }

    #[test]
    fn test_digest_chunks() {
        let a = CompleteHash::of_fragment("a.example/");
        let b = CompleteHash::of_fragment("b.example/");
        let mut adds = a.0.to_vec();
        adds.extend_from_slice(&b.0);
        let mut update = TableUpdate::new("t-digest256");
        decode_chunk(spec(ChunkType::AddDigest, 1, 32), &adds, &mut update).unwrap();
        assert_eq!(update.add_completes.len(), 2);

        let mut subs = 1u32.to_be_bytes().to_vec();
        subs.extend_from_slice(&a.0);
        decode_chunk(spec(ChunkType::SubDigest, 2, 32), &subs, &mut update).unwrap();
        assert_eq!(update.sub_completes[0].add_chunk, 1);
        assert_eq!(update.sub_completes[0].hash, a);
    }

    #[test]
    fn test_empty_sub_digest_registers_chunk() {
        let mut update = TableUpdate::new("t-digest256");
        decode_chunk(spec(ChunkType::SubDigest, 5, 32), &[], &mut update).unwrap();
        assert!(update.sub_chunks.contains(5));
        assert!(update.sub_completes.is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut update = TableUpdate::new("t");
        let err = decode_chunk(spec(ChunkType::Add, 1, 4), b"abcd\x02aaaa", &mut update);
        assert!(matches!(err, Err(ParseError::PayloadMismatch { chunk: 1, .. })));

        let err = decode_chunk(spec(ChunkType::AddDigest, 1, 32), &[0u8; 33], &mut update);
        assert!(matches!(err, Err(ParseError::PayloadMismatch { .. })));
    }
}
