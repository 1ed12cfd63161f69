//! Metric Store (C3, §4.3). A per-stream, bounded, append-only ring with
//! windowed queries. One writer (the stream's Supervisor), many readers
//! (Evaluator, Classifier, history API) — guarded by `parking_lot::RwLock` so
//! readers never block each other and the single writer's append is cheap.
//! Reads clone the relevant slice, so a returned window is an immutable
//! snapshot stable for the reader's lifetime (§8, invariant 2).

use crate::types::{HealthState, MetricSample, SampleKind};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One bucket of the per-minute aggregated history series (§4.3).
#[derive(Debug, Clone)]
pub struct HistoryBucket {
    pub bucket_start: Instant,
    pub mean_ttfb_ms: Option<f64>,
    pub mean_download_ratio: Option<f64>,
    pub error_count: usize,
    pub sample_count: usize,
}

/// A health-state transition recorded for charting alongside the bucketed
/// series (§4.3 `history()`).
#[derive(Debug, Clone)]
pub struct HistoryTransition {
    pub at: Instant,
    pub state: HealthState,
}

/// Aggregated series for charting, returned by [`MetricRing::history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryPayload {
    pub buckets: Vec<HistoryBucket>,
    pub transitions: Vec<HistoryTransition>,
}

/// Bounded append-only ring of samples for one stream.
pub struct MetricRing {
    capacity: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    samples: VecDeque<MetricSample>,
    next_seq: u64,
    transitions: Vec<HistoryTransition>,
}

impl MetricRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Append a sample, assigning it the next per-stream sequence number.
    /// Samples are appended in non-decreasing timestamp order by
    /// construction: the single writer calls this in tick order (§5, §8
    /// invariant 1), and eviction drops from the front once `capacity` is
    /// exceeded.
    pub fn append(&self, mut sample: MetricSample) {
        let mut inner = self.inner.write();
        sample.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.samples.push_back(sample);
        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
        }
    }

    /// Record a health transition for later charting via [`Self::history`].
    pub fn record_transition(&self, at: Instant, state: HealthState) {
        self.inner.write().transitions.push(HistoryTransition { at, state });
    }

    /// Samples with `ts ∈ (now − dur, now]` (§4.3), as an owned snapshot.
    pub fn window(&self, now: Instant, dur: Duration) -> Vec<MetricSample> {
        let inner = self.inner.read();
        let cutoff = now.checked_sub(dur).unwrap_or(now);
        inner
            .samples
            .iter()
            .filter(|s| s.at > cutoff && s.at <= now)
            .cloned()
            .collect()
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<MetricSample> {
        self.inner.read().samples.back().cloned()
    }

    /// Per-minute bucketed aggregates plus the raw transition list, for
    /// charting (§4.3).
    pub fn history(&self, now: Instant, dur: Duration) -> HistoryPayload {
        let window = self.window(now, dur);
        if window.is_empty() {
            let inner = self.inner.read();
            return HistoryPayload {
                buckets: Vec::new(),
                transitions: filter_transitions(&inner.transitions, now, dur),
            };
        }

        let minute = Duration::from_secs(60);
        let earliest = window.first().map(|s| s.at).unwrap_or(now);
        let mut buckets: Vec<(Instant, Vec<&MetricSample>)> = Vec::new();

        for sample in &window {
            let elapsed = sample.at.duration_since(earliest);
            let bucket_index = elapsed.as_secs() / 60;
            let bucket_start = earliest + minute * bucket_index as u32;
            match buckets.last_mut() {
                Some((start, items)) if *start == bucket_start => items.push(sample),
                _ => buckets.push((bucket_start, vec![sample])),
            }
        }

        let history_buckets = buckets
            .into_iter()
            .map(|(bucket_start, items)| {
                let sample_count = items.len();
                let error_count = items.iter().filter(|s| !s.outcome.is_ok()).count();
                let ttfbs: Vec<f64> = items
                    .iter()
                    .filter_map(|s| s.outcome.is_ok().then(|| s.ttfb_ms).flatten())
                    .map(|v| v as f64)
                    .collect();
                let ratios: Vec<f64> = items.iter().filter_map(|s| s.download_ratio()).collect();
                HistoryBucket {
                    bucket_start,
                    mean_ttfb_ms: mean(&ttfbs),
                    mean_download_ratio: mean(&ratios),
                    error_count,
                    sample_count,
                }
            })
            .collect();

        let inner = self.inner.read();
        HistoryPayload {
            buckets: history_buckets,
            transitions: filter_transitions(&inner.transitions, now, dur),
        }
    }

    pub fn manifest_samples(&self, now: Instant, dur: Duration) -> Vec<MetricSample> {
        self.window(now, dur)
            .into_iter()
            .filter(|s| s.kind == SampleKind::Manifest)
            .collect()
    }
}

fn filter_transitions(
    transitions: &[HistoryTransition],
    now: Instant,
    dur: Duration,
) -> Vec<HistoryTransition> {
    let cutoff = now.checked_sub(dur).unwrap_or(now);
    transitions
        .iter()
        .filter(|t| t.at > cutoff && t.at <= now)
        .cloned()
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    fn sample(at: Instant, outcome: Outcome, kind: SampleKind) -> MetricSample {
        MetricSample {
            seq: 0,
            at,
            wall_clock: chrono::Utc::now(),
            kind,
            url: "https://example.com/seg.ts".to_string(),
            outcome,
            ttfb_ms: Some(100),
            total_ms: 300,
            bytes: 1000,
            declared_duration_ms: Some(6000),
        }
    }

    #[test]
    fn window_returns_non_decreasing_timestamps() {
        let ring = MetricRing::new(10);
        let t0 = Instant::now();
        for i in 0..5u64 {
            ring.append(sample(
                t0 + Duration::from_secs(i),
                Outcome::Ok,
                SampleKind::Segment,
            ));
        }
        let now = t0 + Duration::from_secs(10);
        let window = ring.window(now, Duration::from_secs(100));
        let timestamps: Vec<_> = window.iter().map(|s| s.at).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        assert_eq!(window.len(), 5);
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let ring = MetricRing::new(3);
        let t0 = Instant::now();
        for i in 0..10u64 {
            ring.append(sample(
                t0 + Duration::from_secs(i),
                Outcome::Ok,
                SampleKind::Segment,
            ));
        }
        let now = t0 + Duration::from_secs(20);
        let window = ring.window(now, Duration::from_secs(1000));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn snapshot_is_not_mutated_by_later_appends() {
        let ring = MetricRing::new(10);
        let t0 = Instant::now();
        ring.append(sample(t0, Outcome::Ok, SampleKind::Segment));
        let snapshot = ring.window(t0 + Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(snapshot.len(), 1);
        ring.append(sample(
            t0 + Duration::from_secs(2),
            Outcome::Ok,
            SampleKind::Segment,
        ));
        // the earlier snapshot (an owned Vec) is untouched by the new append
        assert_eq!(snapshot.len(), 1);
    }
}
