//! inflow-bridge: request/response bridge to the out-of-process synthesis
//! service over newline-delimited correlated JSON on stdio.

pub mod channel;
pub mod extract;
pub mod source_client;
pub mod synth;

pub use channel::{BridgeConfig, BridgeError, SyncChannel};
pub use inflow_core::types;
