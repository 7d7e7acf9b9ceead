//! Block-checksum header, per-block digests, and the rolling-checksum hash
//! table used to locate candidate matches during delta transfer (§4.4).
//!
//! This crate only describes *what a signature is* and *how to look one
//! up*; computing one against an open file, and consuming one to produce or
//! apply a diff, belongs to the `engine` crate.

use checksums::strong::{Md4, Md5, StrongDigest};
use checksums::{choose_block_length, RollingChecksum};

/// Number of buckets in the weak-checksum hash table, matching the
/// reference client's fixed-size table.
pub const HASH_BUCKETS: usize = 65536;

/// One block's checksum pair: the cheap rolling checksum and the strong
/// digest used to confirm a candidate match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockChecksum {
    /// Packed rolling checksum (`s1 | (s2 << 16)`).
    pub weak: u32,
    /// Full MD4 or MD5 digest of the block, as negotiated by the protocol version.
    pub strong: [u8; 16],
}

/// The four values that precede a block-checksum list on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChecksumHeader {
    /// Number of blocks the old file was divided into (0 if there is no usable old file).
    pub count: i32,
    /// Length in bytes of every block except possibly the last.
    pub block_length: i32,
    /// Number of strong-digest bytes carried per block (always 16 here; the
    /// reference client never truncates it).
    pub strong_length: i32,
    /// Length of the final block (equals `block_length` only when the file
    /// size is an exact multiple of it).
    pub remainder: i32,
}

impl ChecksumHeader {
    /// No usable old file: an all-zero header, which tells the peer to
    /// expect the new file transmitted as raw literal chunks.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            count: 0,
            block_length: 0,
            strong_length: 0,
            remainder: 0,
        }
    }

    /// Computes the header for an old file of `file_size` bytes, choosing
    /// the block length with [`choose_block_length`].
    ///
    /// # Panics
    ///
    /// Panics if `file_size` is negative.
    #[must_use]
    pub fn for_file_size(file_size: i64) -> Self {
        assert!(file_size >= 0, "file_size must not be negative");
        if file_size == 0 {
            return Self::empty();
        }
        let block_length = choose_block_length(file_size as u64) as i32;
        let count = (file_size - 1) / i64::from(block_length) + 1;
        let remainder = file_size - (count - 1) * i64::from(block_length);
        Self {
            count: count as i32,
            block_length,
            strong_length: 16,
            remainder: remainder as i32,
        }
    }
}

/// Computes the packed rolling checksum for one block.
#[must_use]
pub fn weak_checksum(block: &[u8]) -> u32 {
    let mut rolling = RollingChecksum::new();
    rolling.update(block);
    rolling.value()
}

/// Computes the strong digest for one block: MD5 when `protocol_version`
/// is 30 or later, otherwise MD4. Both feed `seed`'s little-endian bytes
/// after the block data, matching the per-block digest rule used on both
/// the generating and matching sides.
#[must_use]
pub fn strong_digest(protocol_version: u32, block: &[u8], seed: i32) -> [u8; 16] {
    if protocol_version >= 30 {
        let mut hasher = Md5::new();
        hasher.update(block);
        hasher.update(&seed.to_le_bytes());
        hasher.finalize()
    } else {
        let mut hasher = Md4::new();
        hasher.update(block);
        hasher.update(&seed.to_le_bytes());
        hasher.finalize()
    }
}

/// Computes both checksums for one block in one call.
#[must_use]
pub fn block_checksum(protocol_version: u32, block: &[u8], seed: i32) -> BlockChecksum {
    BlockChecksum {
        weak: weak_checksum(block),
        strong: strong_digest(protocol_version, block, seed),
    }
}

/// Maps a packed weak checksum to its hash bucket.
#[must_use]
pub fn bucket_hash(weak: u32) -> usize {
    (((weak & 0xffff) + (weak >> 16)) & 0xffff) as usize
}

/// A chaining hash table over a file's block checksums, keyed by weak
/// checksum, so a rolling-checksum match can be confirmed against a small
/// set of candidates instead of a linear scan.
#[derive(Clone, Debug, Default)]
pub struct SignatureTable {
    entries: Vec<BlockChecksum>,
    /// `buckets[h]` is the index of the most recently inserted entry whose
    /// weak checksum hashes to `h`, or `-1`.
    buckets: Vec<i32>,
    /// `next[i]` chains to the previous entry with the same bucket, or `-1`.
    next: Vec<i32>,
}

impl SignatureTable {
    /// Builds a lookup table over `entries`, preserving each entry's index
    /// (used as the negative-token identifier during transfer).
    #[must_use]
    pub fn build(entries: Vec<BlockChecksum>) -> Self {
        let mut buckets = vec![-1i32; HASH_BUCKETS];
        let mut next = vec![-1i32; entries.len()];
        for (i, entry) in entries.iter().enumerate() {
            let bucket = bucket_hash(entry.weak);
            next[i] = buckets[bucket];
            buckets[bucket] = i as i32;
        }
        Self { entries, buckets, next }
    }

    /// Number of blocks in this table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if this table has no blocks (the old file was empty or absent).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The block checksum stored at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> BlockChecksum {
        self.entries[index]
    }

    /// Iterates the indices of blocks whose weak checksum equals `weak`,
    /// most-recently-inserted first (matching the reference client's
    /// singly-linked chain order).
    pub fn candidates(&self, weak: u32) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.buckets[bucket_hash(weak)];
        std::iter::from_fn(move || {
            if cursor < 0 {
                return None;
            }
            let index = cursor as usize;
            cursor = self.next[index];
            Some(index)
        })
        .filter(move |&index| self.entries[index].weak == weak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_file_size_matches_the_reference_block_length_heuristic() {
        let header = ChecksumHeader::for_file_size(1000);
        assert_eq!(header.block_length, 700);
        assert_eq!(header.count, 2);
        assert_eq!(header.remainder, 300);
    }

    #[test]
    fn for_file_size_of_zero_yields_an_empty_header() {
        assert_eq!(ChecksumHeader::for_file_size(0), ChecksumHeader::empty());
    }

    #[test]
    fn weak_checksum_matches_manual_computation() {
        let block = b"hello world";
        let mut s1: u32 = 0;
        let mut s2: u32 = 0;
        for &b in block {
            s1 = s1.wrapping_add(u32::from(b));
            s2 = s2.wrapping_add(s1);
        }
        let expected = (s1 & 0xffff) | ((s2 & 0xffff) << 16);
        assert_eq!(weak_checksum(block), expected);
    }

    #[test]
    fn signature_table_finds_the_block_that_produced_a_checksum() {
        let blocks: Vec<&[u8]> = vec![b"aaaa", b"bbbb", b"cccc"];
        let entries: Vec<BlockChecksum> = blocks.iter().map(|b| block_checksum(30, b, 0)).collect();
        let table = SignatureTable::build(entries.clone());

        for (i, block) in blocks.iter().enumerate() {
            let weak = weak_checksum(block);
            let found = table.candidates(weak).find(|&idx| table.get(idx).strong == entries[i].strong);
            assert_eq!(found, Some(i));
        }
    }

    #[test]
    fn strong_digest_picks_md5_at_protocol_30_and_md4_below() {
        let block = b"payload";
        let md5 = strong_digest(30, block, 7);
        let md4 = strong_digest(29, block, 7);
        assert_ne!(md5, md4);
    }
}
