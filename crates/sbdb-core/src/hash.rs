//! Fixed-width hash values: 4-byte prefixes and 32-byte complete hashes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{COMPLETE_SIZE, PREFIX_SIZE};

/// Truncated SHA-256 of a canonical URL fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Prefix(pub [u8; PREFIX_SIZE]);

impl Prefix {
    /// Read a prefix from the first four bytes of `data`
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; PREFIX_SIZE] = data.get(..PREFIX_SIZE)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Integer view used for ordering-independent seeding
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PREFIX_SIZE] {
        &self.0
    }
}

impl From<u32> for Prefix {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Full SHA-256 digest of a canonical URL fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompleteHash(pub [u8; COMPLETE_SIZE]);

impl CompleteHash {
    /// Hash a canonical fragment such as `"www.example.com/path/"`
    pub fn of_fragment(fragment: &str) -> Self {
        let digest = Sha256::digest(fragment.as_bytes());
        let mut bytes = [0u8; COMPLETE_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; COMPLETE_SIZE] = data.get(..COMPLETE_SIZE)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// The four-byte truncation stored in prefix tables
    pub fn prefix(&self) -> Prefix {
        let mut bytes = [0u8; PREFIX_SIZE];
        bytes.copy_from_slice(&self.0[..PREFIX_SIZE]);
        Prefix(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMPLETE_SIZE] {
        &self.0
    }
}

impl fmt::Display for CompleteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
