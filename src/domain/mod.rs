//! Domain model: value types for gateways, transactions and accounts, plus the ports
//! the orchestration layer talks to.

pub mod account;
pub mod context;
pub mod gateway;
pub mod money;
pub mod ports;
pub mod transaction;
