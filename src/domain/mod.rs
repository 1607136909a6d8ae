pub mod conditional_order;
pub mod eth;
pub mod filter_policy;
pub mod handler;
pub mod poll_result;
pub mod registry;

pub use conditional_order::{ConditionalOrder, ConditionalOrderParams, OrderUid};
