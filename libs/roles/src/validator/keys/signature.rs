use super::PublicKey;
use braid_consensus_crypto::{ed25519, keccak256::Keccak256, encode_hex, ByteFmt, Text, TextFmt};
use std::fmt;

/// A signature from a validator.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub(crate) ed25519::Signature);

impl Signature {
    /// Verify a payload digest against a public key.
    pub fn verify_hash(
        &self,
        hash: &Keccak256,
        pk: &PublicKey,
    ) -> Result<(), ed25519::InvalidSignatureError> {
        pk.0.verify(hash.as_bytes(), &self.0)
    }
}

impl ByteFmt for Signature {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for Signature {
    fn encode(&self) -> String {
        encode_hex("validator:signature:ed25519:", &self.0)
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:signature:ed25519:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, fmt)
    }
}
