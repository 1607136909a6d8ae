pub mod blockchain;
pub mod contracts;
pub mod filter_policy_loader;
pub mod handler_contract;
pub mod metrics;
pub mod notification;
pub mod observability;
pub mod orderbook;
pub mod registry_store;
