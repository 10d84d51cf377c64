//! WebAssembly transaction execution engine for jigs.
//!
//! A transaction is a tape of instructions interpreted by [`TxExecution`]
//! against package modules running in wasmtime. Jigs live in guest memory
//! while a transaction runs; values cross module boundaries through the
//! ABI-driven marshaler, authority is checked against each jig's lock and
//! the caller stack, and every resource is metered in hydros. [`Vm`] wraps
//! the whole flow over a ledger store.
//!
//! [`TxExecution`]: execution::TxExecution
//! [`Vm`]: vm::Vm

pub mod abi;
pub mod builtins;
pub mod call_stack;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod execution;
mod host;
pub mod jig;
pub mod lock;
mod memory;
pub mod metering;
pub mod result;
pub mod runtime;
pub mod state;
pub mod statement;
pub mod vm;

#[cfg(test)]
mod test_utils;
