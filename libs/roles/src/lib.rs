//! Types of the validator role: the identity, messages and certificates
//! validators use to run the BFT consensus protocol.

pub mod validator;
