use super::{build_sample, ProbeRequest, Prober};
use crate::types::{MetricSample, Outcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted probe result: an outcome plus the timing/byte facts a real
/// probe would have measured.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    pub outcome: Outcome,
    pub ttfb_ms: Option<u32>,
    pub total_ms: u32,
    pub bytes: u64,
    /// When set, this probe blocks until cancelled rather than returning
    /// immediately — used to realize the cancellation-bound test (§8.7).
    pub hangs: bool,
}

impl ScriptedProbe {
    pub fn ok(ttfb_ms: u32, total_ms: u32) -> Self {
        Self {
            outcome: Outcome::Ok,
            ttfb_ms: Some(ttfb_ms),
            total_ms,
            bytes: 1024,
            hangs: false,
        }
    }

    pub fn http_error(code: u16) -> Self {
        Self {
            outcome: Outcome::HttpError(code),
            ttfb_ms: None,
            total_ms: 0,
            bytes: 0,
            hangs: false,
        }
    }

    pub fn hung() -> Self {
        Self {
            outcome: Outcome::Timeout,
            ttfb_ms: None,
            total_ms: 0,
            bytes: 0,
            hangs: true,
        }
    }
}

/// Deterministic, scriptable fake [`Prober`] used by unit and integration
/// tests, mirroring the teacher's `MockHealthCheckClient`. Each call to
/// `probe` pops the next queued result for the probed URL, repeating the
/// last one once the queue for that URL is exhausted.
#[derive(Default)]
pub struct MockProber {
    scripts: Mutex<std::collections::HashMap<String, VecDeque<ScriptedProbe>>>,
    bodies: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    probe_counts: Mutex<std::collections::HashMap<String, u32>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes to be returned, in order, for probes of `url`.
    pub fn push(&self, url: &str, probe: ScriptedProbe) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(probe);
    }

    /// Register the body `probe`/[`Prober::fetch_body`] should return for
    /// `url`, so the Supervisor's segment-selection step has something to
    /// parse without a real network call.
    pub fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    /// How many times `probe` was called for `url`, for asserting a URL was
    /// fetched exactly once per tick rather than repeated.
    pub fn probe_count(&self, url: &str) -> u32 {
        *self.probe_counts.lock().get(url).unwrap_or(&0)
    }

    fn next_for(&self, url: &str) -> Option<ScriptedProbe> {
        let mut scripts = self.scripts.lock();
        let queue = scripts.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(
        &self,
        req: &ProbeRequest,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> (MetricSample, Option<Vec<u8>>) {
        *self.probe_counts.lock().entry(req.url.clone()).or_insert(0) += 1;
        let scripted = self.next_for(&req.url).unwrap_or_else(ScriptedProbe::ok_default);

        if scripted.hangs {
            // Never resolves on its own; only cancellation ends the probe,
            // exercising the Supervisor's cancellation bound (§8.7).
            cancel.cancelled().await;
            return (build_sample(req, Outcome::Timeout, None, 0, 0), None);
        }

        let sample = build_sample(
            req,
            scripted.outcome,
            scripted.ttfb_ms,
            scripted.total_ms,
            scripted.bytes,
        );
        let body = sample.outcome.is_ok().then(|| self.bodies.lock().get(&req.url).cloned()).flatten();
        (sample, body)
    }

    async fn fetch_body(
        &self,
        url: &str,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Option<Vec<u8>> {
        self.bodies.lock().get(url).cloned()
    }
}

impl ScriptedProbe {
    fn ok_default() -> Self {
        Self::ok(50, 300)
    }
}
