//! Keccak256 digests, the content hash used for vertex ids and signed payloads.
use crate::{encode_hex, ByteFmt, Text, TextFmt};
use sha3::{digest::Update as _, Digest};
use std::fmt;

#[cfg(test)]
mod test;
pub mod testonly;

/// Keccak256 hash.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keccak256(pub(crate) [u8; 32]);

impl Keccak256 {
    /// Computes a Keccak256 hash of a message.
    pub fn new(msg: &[u8]) -> Self {
        Self(sha3::Keccak256::new().chain(msg).finalize().into())
    }

    /// Returns a reference to the bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 4 bytes in hex. Used to keep log lines readable.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl ByteFmt for Keccak256 {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.try_into()?))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TextFmt for Keccak256 {
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("keccak256:")?.decode_hex()
    }

    fn encode(&self) -> String {
        encode_hex("keccak256:", self)
    }
}

impl fmt::Debug for Keccak256 {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "keccak256:{}", self.short())
    }
}

/// Incremental hasher for structured payloads.
///
/// Every field is fed with a fixed width (integers big endian) or with
/// a length prefix (byte strings), so that distinct field sequences
/// never produce the same input stream.
#[derive(Clone, Default)]
pub struct Keccak256Hasher(sha3::Keccak256);

impl Keccak256Hasher {
    /// Starts a hasher for the payload kind identified by `domain`.
    pub fn new(domain: &str) -> Self {
        Self::default().bytes(domain.as_bytes())
    }

    /// Feeds a `u64`.
    pub fn u64(mut self, x: u64) -> Self {
        Digest::update(&mut self.0, x.to_be_bytes());
        self
    }

    /// Feeds a boolean flag.
    pub fn bool(mut self, x: bool) -> Self {
        Digest::update(&mut self.0, [u8::from(x)]);
        self
    }

    /// Feeds a length-prefixed byte string.
    pub fn bytes(self, x: &[u8]) -> Self {
        let mut this = self.u64(x.len() as u64);
        Digest::update(&mut this.0, x);
        this
    }

    /// Feeds another digest.
    pub fn hash(mut self, x: &Keccak256) -> Self {
        Digest::update(&mut self.0, x.0);
        self
    }

    /// Finalizes the digest.
    pub fn finish(self) -> Keccak256 {
        Keccak256(self.0.finalize().into())
    }
}
