//! Cryptographic primitives for rotating attendance tokens.

pub mod freshness;
pub mod signer;
pub mod token;
