//! inflow-dashboard: fan-in aggregator over the source watchers plus the
//! rule-based triage categorizer.

pub mod aggregator;
pub mod event;
pub mod triage;

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorHandle, SourceSpec};
pub use event::DashboardEvent;
pub use inflow_core::types;
pub use triage::{TriageCategorizer, TriageConfig, TriageHandle};
