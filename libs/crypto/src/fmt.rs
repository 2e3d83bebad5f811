//! Text and byte encodings of keys, signatures and hashes.
//!
//! Text encodings have the form `<tag>:<hex>`, where the tag names the role and the
//! scheme of the value (e.g. `validator:public:ed25519:`), so that values of different
//! kinds never decode as each other.
use anyhow::Context as _;

/// Text being decoded by `TextFmt::decode`. Remembers the whole input,
/// so that errors can point at the part which was already consumed.
pub struct Text<'a> {
    context: &'a str,
    inner: &'a str,
}

impl<'a> Text<'a> {
    /// Wraps the text to decode.
    pub fn new(s: &'a str) -> Self {
        Self {
            context: s,
            inner: s,
        }
    }

    fn consumed(&self) -> &'a str {
        // `inner` is a suffix of `context`, so the split falls on a char boundary.
        &self.context[..self.context.len() - self.inner.len()]
    }

    /// Consumes the given tag, failing if the text doesn't start with it.
    pub fn strip(mut self, tag: &str) -> anyhow::Result<Self> {
        let Some(inner) = self.inner.strip_prefix(tag) else {
            anyhow::bail!("{}: expected {tag} got {}", self.consumed(), self.inner);
        };
        self.inner = inner;
        Ok(self)
    }

    /// Decodes the rest of the text as hex encoded `ByteFmt`.
    pub fn decode_hex<T: ByteFmt>(self) -> anyhow::Result<T> {
        let raw = hex::decode(self.inner).with_context(|| self.consumed().to_owned())?;
        ByteFmt::decode(&raw).with_context(|| self.consumed().to_owned())
    }

    /// `t.decode::<T>()` is `<T as TextFmt>::decode(t)`.
    pub fn decode<T: TextFmt>(self) -> anyhow::Result<T> {
        TextFmt::decode(self)
    }
}

/// Encodes `value` as `<tag><hex bytes>`. Inverse of `Text::strip(tag)?.decode_hex()`.
pub fn encode_hex<T: ByteFmt>(tag: &str, value: &T) -> String {
    format!("{tag}{}", hex::encode(value.encode()))
}

/// Human readable encoding, used in configs and logs.
/// `decode(encode(x)) == x` has to hold, and the encodings of different types must not
/// decode as each other.
pub trait TextFmt: Sized {
    /// Decodes the value.
    fn decode(text: Text) -> anyhow::Result<Self>;
    /// Encodes the value.
    fn encode(&self) -> String;
}

/// Fixed byte encoding. This is the encoding which gets hashed and signed, so it
/// must not change between releases.
pub trait ByteFmt: Sized {
    /// Decodes the value.
    fn decode(bytes: &[u8]) -> anyhow::Result<Self>;
    /// Encodes the value.
    fn encode(&self) -> Vec<u8>;
}
