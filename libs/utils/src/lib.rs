//! Crate that holds several small utilities and primitives.

pub mod pipe;
pub mod testonly;
