use checksums::strong::{Md4, Md5, StrongDigest};

/// Whole-file digest context.
///
/// The seed-mixing rule differs by protocol version: protocol 30 hashes
/// only the file's bytes, while protocol 29 primes the MD4 context with the
/// checksum seed before any file data arrives. Per-block digests don't use
/// this type; they always append the seed after the block (see
/// [`signature::strong_digest`]).
pub(crate) enum WholeFileDigest {
    Md4(Md4),
    Md5(Md5),
}

impl WholeFileDigest {
    pub(crate) fn new(protocol_version: u32, seed: i32) -> Self {
        if protocol_version >= 30 {
            Self::Md5(Md5::new())
        } else {
            let mut hasher = Md4::new();
            hasher.update(&seed.to_le_bytes());
            Self::Md4(hasher)
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md4(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    pub(crate) fn finalize(self) -> [u8; 16] {
        match self {
            Self::Md4(h) => h.finalize(),
            Self::Md5(h) => h.finalize(),
        }
    }
}
