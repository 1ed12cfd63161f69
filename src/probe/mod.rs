//! Probe Client (C2, §4.2). A single observational HTTP GET, measured for
//! TTFB/total time/bytes/outcome. Never throws — every failure mode is
//! surfaced as an [`Outcome`] variant on the returned sample, the same
//! "failures are data" contract the teacher's `HttpMonitor::probe` follows.

mod isahc_prober;
mod mock;

pub use isahc_prober::IsahcProber;
pub use mock::{MockProber, ScriptedProbe};

use crate::types::{MetricSample, Outcome, SampleKind};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What to probe and how to interpret the result.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub kind: SampleKind,
    /// Declared duration for segment probes, from the manifest (§3).
    pub declared_duration_ms: Option<u32>,
}

/// HTTP client abstraction for dependency injection and testing, mirroring
/// the teacher's `HttpClientTrait`/`HealthCheckClient` split.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Perform one GET, honoring `timeout` and surrendering within one
    /// timeout interval after `cancel` fires (§4.2, §5). The response body is
    /// returned alongside the sample whenever one was read (i.e. the request
    /// succeeded) so a manifest probe can double as the Parser's input
    /// without a second GET of the same URL (§4.7 step 2).
    async fn probe(
        &self,
        req: &ProbeRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (MetricSample, Option<Vec<u8>>);

    /// Fetch the body of a URL that was not already probed this tick — a
    /// master playlist's variant, for instance, once the master itself has
    /// already been probed via `probe`.
    async fn fetch_body(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Vec<u8>>;
}

/// Build a [`MetricSample`] from raw timing/byte/outcome facts, filling in
/// the bookkeeping fields (`at`, `wall_clock`) a caller doesn't need to know
/// about. `seq` is assigned later by the Metric Store on append, since it is
/// the single writer and owns the per-stream sequence counter (§4.3).
pub(crate) fn build_sample(
    req: &ProbeRequest,
    outcome: Outcome,
    ttfb_ms: Option<u32>,
    total_ms: u32,
    bytes: u64,
) -> MetricSample {
    MetricSample {
        seq: 0,
        at: Instant::now(),
        wall_clock: chrono::Utc::now(),
        kind: req.kind,
        url: req.url.clone(),
        outcome,
        ttfb_ms,
        total_ms,
        bytes,
        declared_duration_ms: req.declared_duration_ms,
    }
}
