//! Shared type definitions for the jig execution engine: pointers, locks,
//! outputs, host values, the instruction and transaction codec, and the ABI
//! document model.

pub mod abi;
pub mod error;
pub mod instruction;
pub mod lock;
pub mod output;
pub mod package;
pub mod pointer;
pub mod primitives;
pub mod tx;
pub mod value;
