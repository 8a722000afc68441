//! Content addresses for stored chunks.
//!
//! A chunk id is the truncated SHA-256 of the chunk's canonical bytes,
//! rendered as a fixed-width lowercase base32 string. The text form is the
//! wire format: commits reference each other by these strings and the RPC
//! surface exposes them as the database root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of raw bytes in a chunk id.
pub const BYTE_LEN: usize = 20;

/// Number of characters in the text form (BYTE_LEN * 8 / 5).
pub const STRING_LEN: usize = 32;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Unique identifier for any stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId([u8; BYTE_LEN]);

impl ChunkId {
    /// Create a ChunkId from raw bytes.
    pub fn new(bytes: [u8; BYTE_LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the ChunkId of a chunk's bytes.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; BYTE_LEN];
        bytes.copy_from_slice(&digest[..BYTE_LEN]);
        Self(bytes)
    }

    /// The all-zero id, used as the text form's lower bound and for
    /// "no chunk" sentinels in tests.
    pub fn zero() -> Self {
        Self([0u8; BYTE_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; BYTE_LEN] {
        &self.0
    }

    /// Parse the fixed-width base32 text form.
    pub fn parse(s: &str) -> Result<Self, ParseIdError> {
        if s.len() != STRING_LEN {
            return Err(ParseIdError::Length(s.len()));
        }
        let mut bytes = [0u8; BYTE_LEN];
        let mut acc: u16 = 0;
        let mut bits: u8 = 0;
        let mut pos = 0;
        for c in s.bytes() {
            let v = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'v' => c - b'a' + 10,
                _ => return Err(ParseIdError::Char(c as char)),
            };
            acc = (acc << 5) | u16::from(v);
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                bytes[pos] = (acc >> bits) as u8;
                pos += 1;
            }
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        let mut acc: u16 = 0;
        let mut bits: u8 = 0;
        for &b in &self.0 {
            acc = (acc << 8) | u16::from(b);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                f.write_char(ALPHABET[((acc >> bits) & 0x1f) as usize] as char)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ChunkId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors produced when parsing the text form of a chunk id.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("chunk id must be {STRING_LEN} characters, got {0}")]
    Length(usize),

    #[error("invalid character in chunk id: {0:?}")]
    Char(char),
}
