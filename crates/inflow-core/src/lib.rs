//! inflow-core: shared types, error taxonomy, source-client traits, and the
//! PII/content filter for the inflow synchronization core.

pub mod client;
pub mod error;
pub mod filter;
pub mod types;
