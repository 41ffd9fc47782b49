//! Per-block content hashing using BLAKE3

use std::fmt;
use std::io::{ErrorKind, Read};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of one transfer and hashing unit. The `hash` and `get` verbs must agree on it.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// A content hash using BLAKE3 (256-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

// Hashes travel as lowercase hex strings in JSON responses.
impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
///
/// Returns the number of bytes read; anything short of `buf.len()` means end of stream.
///
/// # Errors
/// Returns any read error other than `Interrupted`
pub fn read_full_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Hash a stream block by block.
///
/// Each block is hashed independently. The final block may be short, and an
/// empty stream still yields one hash (of the empty input). Returns the hashes
/// together with the number of bytes consumed.
///
/// # Errors
/// Returns an error if reading fails at any point; no partial result is produced
pub fn block_hashes<R: Read>(reader: &mut R) -> std::io::Result<(Vec<ContentHash>, u64)> {
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut hashes = Vec::new();
    let mut total = 0u64;

    loop {
        let n = read_full_block(reader, &mut buffer)?;
        // An empty read only produces a hash when nothing has been hashed yet.
        if n > 0 || hashes.is_empty() {
            hashes.push(ContentHash::from_bytes(&buffer[..n]));
        }
        total += n as u64;
        if n < BLOCK_SIZE {
            break;
        }
    }

    Ok((hashes, total))
}

/// Number of blocks a file of `size` bytes is divided into (never zero).
#[must_use]
pub fn block_count(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64).max(1)
}
