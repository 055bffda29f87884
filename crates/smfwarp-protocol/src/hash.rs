//! Digest providers for hash based duplicate detection.
//!
//! Every provider follows the same `init`/`update`/`finalize`/`value` cycle so
//! the identifier can feed it discontiguous packet regions.

use sha1::{Digest, Sha1};

use smfwarp_core::config::HashAlgorithm;

/// Incremental digest over packet bytes.
pub trait HashProvider: Send + std::fmt::Debug {
    /// Algorithm implemented by this provider.
    fn algorithm(&self) -> HashAlgorithm;

    /// Starts a new digest, discarding any pending input.
    fn init(&mut self);

    /// Feeds bytes into the digest.
    fn update(&mut self, data: &[u8]);

    /// Completes the digest; the result is available from [`value`](Self::value).
    fn finalize(&mut self);

    /// Result of the last [`finalize`](Self::finalize).
    fn value(&self) -> &[u8];

    /// Convenience: digests `parts` in order and returns the result.
    fn digest(&mut self, parts: &[&[u8]]) -> Vec<u8> {
        self.init();
        for part in parts {
            self.update(part);
        }
        self.finalize();
        self.value().to_vec()
    }
}

/// Creates the provider for `algorithm`, or `None` when hashing is disabled.
pub fn hash_provider(algorithm: HashAlgorithm) -> Option<Box<dyn HashProvider>> {
    match algorithm {
        HashAlgorithm::None => None,
        HashAlgorithm::Crc32 => Some(Box::<Crc32Hash>::default()),
        HashAlgorithm::Md5 => Some(Box::<Md5Hash>::default()),
        HashAlgorithm::Sha1 => Some(Box::<Sha1Hash>::default()),
    }
}

/// CRC-32 (IEEE), big-endian 4-byte value.
#[derive(Debug, Default)]
pub struct Crc32Hash {
    hasher: crc32fast::Hasher,
    value: [u8; 4],
}

impl HashProvider for Crc32Hash {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Crc32
    }

    fn init(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&mut self) {
        let hasher = std::mem::take(&mut self.hasher);
        self.value = hasher.finalize().to_be_bytes();
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// MD5, 16-byte value.
pub struct Md5Hash {
    context: md5::Context,
    value: [u8; 16],
}

impl Default for Md5Hash {
    fn default() -> Self {
        Self { context: md5::Context::new(), value: [0u8; 16] }
    }
}

impl std::fmt::Debug for Md5Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5Hash").field("value", &self.value).finish()
    }
}

impl HashProvider for Md5Hash {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Md5
    }

    fn init(&mut self) {
        self.context = md5::Context::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(&mut self) {
        let context = std::mem::replace(&mut self.context, md5::Context::new());
        self.value = context.compute().0;
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// SHA-1, 20-byte value.
#[derive(Debug, Default)]
pub struct Sha1Hash {
    hasher: Sha1,
    value: [u8; 20],
}

impl HashProvider for Sha1Hash {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha1
    }

    fn init(&mut self) {
        self.hasher = Sha1::new();
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finalize(&mut self) {
        let hasher = std::mem::take(&mut self.hasher);
        self.value.copy_from_slice(&hasher.finalize());
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let mut crc = Crc32Hash::default();
        assert_eq!(crc.digest(&[b"123456789"]), vec![0xcb, 0xf4, 0x39, 0x26]);

        let mut md5 = Md5Hash::default();
        let empty = md5.digest(&[]);
        assert_eq!(empty[..4], [0xd4, 0x1d, 0x8c, 0xd9]);

        let mut sha1 = Sha1Hash::default();
        let abc = sha1.digest(&[b"abc"]);
        assert_eq!(abc[..4], [0xa9, 0x99, 0x3e, 0x36]);
        assert_eq!(abc.len(), 20);
    }

    #[test]
    fn test_parts_equal_whole() {
        for algorithm in [HashAlgorithm::Crc32, HashAlgorithm::Md5, HashAlgorithm::Sha1] {
            let mut provider = hash_provider(algorithm).unwrap();
            assert_eq!(provider.algorithm(), algorithm);
            let whole = provider.digest(&[b"hello world"]);
            let parts = provider.digest(&[b"hello", b" ", b"world"]);
            assert_eq!(whole, parts);
        }
        assert!(hash_provider(HashAlgorithm::None).is_none());
    }

    #[test]
    fn test_init_discards_pending_input() {
        let mut provider = Crc32Hash::default();
        provider.update(b"garbage");
        provider.init();
        provider.update(b"123456789");
        provider.finalize();
        assert_eq!(provider.value(), &[0xcb, 0xf4, 0x39, 0x26]);
    }
}
