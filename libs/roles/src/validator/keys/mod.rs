//! Cryptographic keys representing the validator role.

mod public_key;
mod secret_key;
mod signature;
mod testonly;
#[cfg(test)]
mod tests;

pub use public_key::PublicKey;
pub use secret_key::SecretKey;
pub use signature::Signature;
