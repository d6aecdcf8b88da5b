//! Content fingerprints for synthesis requests.
//!
//! A [`Fingerprint`] is the first 128 bits of a SHA-256 digest over
//! `(voice, speaker, text)`. Each field is length-prefixed so that
//! `("ab", "c")` and `("a", "bc")` never collide by concatenation.
//!
//! Unlike `DefaultHasher`, the digest is stable across processes and
//! builds, which the file cache relies on: a fingerprint computed today
//! must find the `.wav` written by yesterday's process.

use std::fmt;

use sha2::{Digest, Sha256};

/// Deterministic 128-bit key for a (voice, speaker, text) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    /// Compute the fingerprint of a synthesis request.
    pub fn new(voice: &str, speaker: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [voice, speaker, text] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(prefix))
    }

    /// Lowercase hex form, used as the file cache stem.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
