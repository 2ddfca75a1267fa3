//! Durable block storage for the ledger.
//!
//! [`SledStore`] implements [`ChainStore`] on an embedded sled database, so a
//! node can restart without losing its chain.

pub mod sled_store;

pub use ledger_core::store::ChainStore;
pub use sled_store::SledStore;
