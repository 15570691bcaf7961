pub mod cfg;
pub mod contract;
pub mod error;
pub mod invoke;
pub mod mediator;
pub mod message;
pub mod message_log;
pub mod reconcile;
pub mod relay;
pub mod sequence;
pub mod serde_util;
pub mod signer;
pub mod state;
