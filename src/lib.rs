//! HLS fleet observation and incident pipeline: poll a small fleet of HLS
//! manifests/segments, evaluate tri-state stream health, manage an incident
//! lifecycle, and classify probable root causes — all in-memory, with an
//! async `Registry` as the single entry point for the outer surface.

pub mod classifier;
pub mod config;
pub mod error;
pub mod health;
pub mod incident;
pub mod parser;
pub mod probe;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod thumbnail;
pub mod types;

pub use config::Config;
pub use registry::{Registry, StreamDetail, StreamSummary};
pub use types::{HealthState, Incident, IncidentId, RootCause, Stream, StreamId};
