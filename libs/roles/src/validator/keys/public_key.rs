use braid_consensus_crypto::{ed25519, encode_hex, ByteFmt, Text, TextFmt};
use std::fmt;

/// Public key of a validator. This is the identity of a BFT node:
/// votes, proposals and certificates name their authors by it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub(crate) ed25519::PublicKey);

impl PublicKey {
    /// Short identifier derived from the key, used in logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl ByteFmt for PublicKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for PublicKey {
    fn encode(&self) -> String {
        encode_hex("validator:public:ed25519:", &self.0)
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:public:ed25519:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "node:{}", self.short_id())
    }
}
