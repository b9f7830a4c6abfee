//! Blob Cipher
//!
//! Keyed BLAKE3 keystream XORed over the stored (compressed) payload of an
//! encrypted blob. The blob handle is mixed into the stream so two blobs
//! under one key never share keystream bytes.

use std::fmt;

/// Context string for deriving keys from passphrases
const KEY_CONTEXT: &str = "baw 2024-06 blob cipher key";

/// 256-bit blob decryption key
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionKey([u8; 32]);

impl DecryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a key from arbitrary key material
    pub fn derive(material: &[u8]) -> Self {
        Self(blake3::derive_key(KEY_CONTEXT, material))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(..)")
    }
}

/// Encrypt or decrypt `data` in place (the transform is its own inverse)
pub fn apply_keystream(key: &DecryptionKey, handle: u64, data: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_keyed(key.as_bytes());
    hasher.update(&handle.to_le_bytes());
    let mut stream = hasher.finalize_xof();

    let mut block = [0u8; 64];
    for chunk in data.chunks_mut(block.len()) {
        let keystream = &mut block[..chunk.len()];
        stream.fill(keystream);
        for (byte, k) in chunk.iter_mut().zip(keystream.iter()) {
            *byte ^= k;
        }
    }
}
