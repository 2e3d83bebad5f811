//! Cryptographic primitives used by the braid consensus crates:
//! keccak256 hashing and ed25519 signatures, plus their byte and text encodings.

pub use fmt::*;

pub mod ed25519;
mod fmt;
pub mod keccak256;
