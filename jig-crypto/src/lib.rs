//! Cryptographic primitives for the jig execution engine.

pub mod address;
pub mod hash;
pub mod keys;
pub mod package;
pub mod tx;
