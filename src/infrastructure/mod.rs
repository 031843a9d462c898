//! Collaborator implementations: ledgers, registries, the outbox, currency handling and
//! the built-in postback gateway.

pub mod currency;
pub mod in_memory;
pub mod postback;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
