//! Strong checksum implementations used to confirm a weak-checksum match.
//!
//! Protocol 29 uses MD4; protocol 30 and later use MD5. Both are exposed
//! behind [`StrongDigest`] so the signature and diff engine crates can pick
//! the negotiated algorithm without caring which concrete hasher backs it.
//! Seed mixing (rsync prefixes/suffixes the checksum seed around the hashed
//! bytes depending on whether this is a per-block or whole-file digest) is
//! the caller's responsibility: feed the bytes in whatever order the wire
//! format for that digest requires, then finalize.

mod base64;
mod md4;
mod md5;

pub use md4::Md4;
pub use md5::Md5;

/// Trait implemented by the strong checksum algorithms rsync negotiates.
///
/// # Examples
///
/// ```
/// use checksums::strong::{Md5, StrongDigest};
///
/// let mut hasher = Md5::new();
/// hasher.update(b"example");
/// let digest = hasher.finalize();
/// assert_eq!(digest.as_ref().len(), Md5::DIGEST_LEN);
/// ```
pub trait StrongDigest: Sized {
    /// Type used to parameterise a new digest instance.
    type Seed: Default;

    /// Type returned when finalising the digest.
    type Digest: AsRef<[u8]> + Copy;

    /// Length of the final digest in bytes.
    const DIGEST_LEN: usize;

    /// Creates a new hasher with an empty state.
    fn new() -> Self {
        Self::with_seed(Default::default())
    }

    /// Creates a new hasher using the provided seed value.
    fn with_seed(seed: Self::Seed) -> Self;

    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);

    /// Finalises the digest and returns the resulting hash.
    fn finalize(self) -> Self::Digest;

    /// Convenience helper that hashes `data` in a single call.
    fn digest(data: &[u8]) -> Self::Digest {
        Self::digest_with_seed(Default::default(), data)
    }

    /// Convenience helper that hashes `data` using an explicit seed value.
    fn digest_with_seed(seed: Self::Seed, data: &[u8]) -> Self::Digest {
        let mut hasher = Self::with_seed(seed);
        hasher.update(data);
        hasher.finalize()
    }
}
