//! Core data model shared across every component (§3 of the design spec).
//!
//! Dynamic, string-typed payloads are avoided in favor of tagged enums — the
//! same discipline the teacher crate applies to `NetworkStatus`/`GateType`.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Opaque stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque incident identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream configuration. Immutable after creation except for deletion (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub name: String,
    pub manifest_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Which kind of request a [`MetricSample`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    Manifest,
    Segment,
}

/// Outcome of a single probe (§3, §4.2). Probe failures are data, never
/// exceptions — this enum is how that contract is expressed in the type
/// system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Ok,
    HttpError(u16),
    Timeout,
    Dns,
    Connect,
    ParseError,
    Other,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

/// One observation recorded by the Probe Client and appended to the Metric
/// Store. See §3 for invariants on ordering and `download_ratio` validity.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// Per-stream monotonic sequence number; used as the ordering key instead
    /// of wall clock, which is not guaranteed monotonic.
    pub seq: u64,
    pub at: Instant,
    pub wall_clock: chrono::DateTime<chrono::Utc>,
    pub kind: SampleKind,
    pub url: String,
    pub outcome: Outcome,
    pub ttfb_ms: Option<u32>,
    pub total_ms: u32,
    pub bytes: u64,
    pub declared_duration_ms: Option<u32>,
}

impl MetricSample {
    /// `total_ms / declared_duration_ms`, defined only for ok segment samples
    /// with a positive declared duration (§3).
    pub fn download_ratio(&self) -> Option<f64> {
        if self.kind != SampleKind::Segment || !self.outcome.is_ok() {
            return None;
        }
        match self.declared_duration_ms {
            Some(d) if d > 0 => Some(self.total_ms as f64 / d as f64),
            _ => None,
        }
    }
}

/// Tri-state stream health (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Green,
    Yellow,
    Red,
}

/// Aggregate statistics over the current evaluation window, surfaced to
/// operators alongside the health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStats {
    pub error_count: usize,
    pub sample_count: usize,
    pub avg_ttfb_ms: Option<f64>,
    pub avg_download_ratio: Option<f64>,
}

/// Point-in-time health evaluation result (§3, §4.4). A pure function of the
/// current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub reason: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub window_stats: WindowStats,
}

/// A health state change, emitted by the Evaluator only when the state
/// differs from the previous snapshot (after hysteresis collapse).
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
    pub at: Instant,
}

/// Incident lifecycle status (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// Timeline event kind (§3). No stringly-typed payload beyond the
/// human-readable `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineEventKind {
    SegmentOk,
    SegmentFail,
    ManifestFail,
    HealthTransition,
    IncidentOpened,
    IncidentAcknowledged,
    IncidentResolved,
    ThumbnailCaptured,
}

/// Append-only timeline entry, ordered by `(ts, id)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub kind: TimelineEventKind,
    pub message: String,
}

/// An operator-facing incident record (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub stream_id: StreamId,
    pub status: IncidentStatus,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub acknowledged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub trigger_reason: String,
    pub timeline: Vec<TimelineEvent>,
}

/// Root cause label, a fixed enumeration (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootCauseLabel {
    OriginCdnOutage,
    EncoderPackagerIssue,
    NetworkCongestion,
    CdnEdgeLatency,
    IntermittentFailures,
    InsufficientEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Stateless classification result (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub label: RootCauseLabel,
    pub confidence: Option<Confidence>,
    pub evidence: Vec<String>,
}
