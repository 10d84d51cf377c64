//! Storage abstraction for the jig execution engine.
//!
//! Provides a [`KvStore`](traits::KvStore) trait with an in-memory backend and
//! the [`LedgerStore`](ledger::LedgerStore) that keeps outputs, origin tips,
//! packages and the address index on top of it.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod traits;
