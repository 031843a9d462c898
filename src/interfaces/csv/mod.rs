//! CSV adapters for the replay binary.

pub mod ledger_writer;
pub mod notification_reader;
