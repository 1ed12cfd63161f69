//! Health Evaluator (C4, §4.4). Pure over `(window, config)`: maps the last
//! `window_short_s` of samples to {GREEN, YELLOW, RED} plus a human reason,
//! with a 30s hysteresis collapse on GREEN→YELLOW→GREEN flips. CPU-only, no
//! suspension points (§5).

use crate::config::Config;
use crate::types::{HealthSnapshot, HealthState, MetricSample, Outcome, SampleKind, Transition, WindowStats};
use std::time::{Duration, Instant};

/// Facts computed over the window, per the definitions in §4.4.
struct WindowFacts {
    err_rate: f64,
    avg_ttfb: Option<f64>,
    avg_ratio: Option<f64>,
    manifest_ok_recently: bool,
    consecutive_errors: usize,
    sample_count: usize,
    error_count: usize,
}

fn compute_facts(window: &[MetricSample], now: Instant) -> WindowFacts {
    let sample_count = window.len();
    let error_count = window.iter().filter(|s| !s.outcome.is_ok()).count();
    let err_rate = if sample_count == 0 {
        0.0
    } else {
        error_count as f64 / sample_count as f64
    };

    let ttfbs: Vec<f64> = window
        .iter()
        .filter(|s| s.outcome.is_ok())
        .filter_map(|s| s.ttfb_ms)
        .map(|v| v as f64)
        .collect();
    let avg_ttfb = mean(&ttfbs);

    let ratios: Vec<f64> = window.iter().filter_map(|s| s.download_ratio()).collect();
    let avg_ratio = mean(&ratios);

    let recent_manifests: Vec<&MetricSample> = window
        .iter()
        .filter(|s| s.kind == SampleKind::Manifest && now.duration_since(s.at) <= Duration::from_secs(30))
        .collect();
    let manifest_ok_recently = if recent_manifests.len() >= 2 {
        recent_manifests.iter().any(|s| s.outcome.is_ok())
    } else {
        // fewer than 2 attempts in the last 30s: rule 1's "not manifest_ok"
        // clause does not apply (§4.4).
        true
    };

    let mut consecutive_errors = 0usize;
    for s in window.iter().rev() {
        if s.outcome.is_ok() {
            break;
        }
        consecutive_errors += 1;
    }

    WindowFacts {
        err_rate,
        avg_ttfb,
        avg_ratio,
        manifest_ok_recently,
        consecutive_errors,
        sample_count,
        error_count,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Evaluate the window against the state rules in §4.4 (first match wins).
fn decide(facts: &WindowFacts, cfg: &Config) -> (HealthState, String) {
    if facts.consecutive_errors >= cfg.red_consecutive_errors {
        return (
            HealthState::Red,
            format!(
                "{} consecutive probe failures reached the {} threshold",
                facts.consecutive_errors, cfg.red_consecutive_errors
            ),
        );
    }
    if facts.err_rate >= cfg.red_err_rate {
        return (
            HealthState::Red,
            format!(
                "Error rate {:.0}% reached the {:.0}% threshold over last {}s",
                facts.err_rate * 100.0,
                cfg.red_err_rate * 100.0,
                cfg.window_short_s
            ),
        );
    }
    if !facts.manifest_ok_recently {
        return (
            HealthState::Red,
            format!(
                "No successful manifest probe in the last 30s over last {}s",
                cfg.window_short_s
            ),
        );
    }

    if let Some(avg_ttfb) = facts.avg_ttfb {
        if avg_ttfb > cfg.ttfb_yellow_ms as f64 {
            return (
                HealthState::Yellow,
                format!(
                    "Avg TTFB {:.0} ms exceeded {} ms threshold over last {}s",
                    avg_ttfb, cfg.ttfb_yellow_ms, cfg.window_short_s
                ),
            );
        }
    }
    if let Some(avg_ratio) = facts.avg_ratio {
        if avg_ratio > cfg.ratio_yellow {
            return (
                HealthState::Yellow,
                format!(
                    "Avg download ratio {:.2} exceeded {:.2} threshold over last {}s",
                    avg_ratio, cfg.ratio_yellow, cfg.window_short_s
                ),
            );
        }
    }
    if facts.err_rate > 0.0 && facts.err_rate < cfg.red_err_rate {
        return (
            HealthState::Yellow,
            format!(
                "Error rate {:.0}% observed over last {}s",
                facts.err_rate * 100.0,
                cfg.window_short_s
            ),
        );
    }

    (
        HealthState::Green,
        format!(
            "{} of {} probes ok over last {}s",
            facts.sample_count - facts.error_count,
            facts.sample_count,
            cfg.window_short_s
        ),
    )
}

/// Tracks recent health states so a brief GREEN→YELLOW→GREEN flip can be
/// collapsed into a no-op rather than reported as two transitions (§4.4).
/// The Evaluator itself stays a pure function over `(window, config)`; this
/// tracker is the thin stateful wrapper the Supervisor drives it through.
pub struct HysteresisTracker {
    last_reported: Option<HealthSnapshot>,
    last_reported_at: Option<Instant>,
    pending_yellow_since: Option<Instant>,
}

impl Default for HysteresisTracker {
    fn default() -> Self {
        Self {
            last_reported: None,
            last_reported_at: None,
            pending_yellow_since: None,
        }
    }
}

impl HysteresisTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.last_reported.as_ref()
    }

    /// Overwrite the last-reported snapshot without going through
    /// `evaluate`, used when the Supervisor task itself fails and needs to
    /// publish a synthetic RED rather than a window-derived one (§4.7).
    pub fn force_state(&mut self, snapshot: HealthSnapshot, now: Instant) {
        self.pending_yellow_since = None;
        self.last_reported = Some(snapshot);
        self.last_reported_at = Some(now);
    }

    /// Evaluate the window and apply hysteresis: a YELLOW that reverts to
    /// GREEN within 30s of its onset produces the GREEN snapshot but no
    /// [`Transition`] event.
    pub fn evaluate(
        &mut self,
        window: &[MetricSample],
        cfg: &Config,
        now: Instant,
    ) -> (HealthSnapshot, Option<Transition>) {
        let facts = compute_facts(window, now);
        let (state, reason) = decide(&facts, cfg);

        let snapshot = HealthSnapshot {
            state,
            reason,
            updated_at: chrono::Utc::now(),
            window_stats: WindowStats {
                error_count: facts.error_count,
                sample_count: facts.sample_count,
                avg_ttfb_ms: facts.avg_ttfb,
                avg_download_ratio: facts.avg_ratio,
            },
        };

        let prev_state = self.last_reported.as_ref().map(|s| s.state);

        match (prev_state, state) {
            (Some(HealthState::Green), HealthState::Yellow) => {
                self.pending_yellow_since = Some(now);
            }
            (Some(HealthState::Yellow), HealthState::Green) => {
                if let Some(since) = self.pending_yellow_since {
                    if now.duration_since(since) <= Duration::from_secs(30) {
                        // Collapse: report GREEN but no transition event, and
                        // roll back as if we had stayed GREEN throughout.
                        self.pending_yellow_since = None;
                        self.last_reported = Some(snapshot.clone());
                        self.last_reported_at = Some(now);
                        return (snapshot, None);
                    }
                }
                self.pending_yellow_since = None;
            }
            (_, HealthState::Green) => {
                self.pending_yellow_since = None;
            }
            _ => {}
        }

        let transition = match prev_state {
            Some(prev) if prev != state => Some(Transition { from: prev, to: state, at: now }),
            None => Some(Transition { from: state, to: state, at: now }),
            _ => None,
        };

        self.last_reported = Some(snapshot.clone());
        self.last_reported_at = Some(now);

        (snapshot, transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleKind;

    fn ok_sample(at: Instant, kind: SampleKind, ttfb: u32) -> MetricSample {
        MetricSample {
            seq: 0,
            at,
            wall_clock: chrono::Utc::now(),
            kind,
            url: "https://example.com".to_string(),
            outcome: Outcome::Ok,
            ttfb_ms: Some(ttfb),
            total_ms: ttfb + 50,
            bytes: 1000,
            declared_duration_ms: Some(6000),
        }
    }

    fn failing_sample(at: Instant) -> MetricSample {
        MetricSample {
            seq: 0,
            at,
            wall_clock: chrono::Utc::now(),
            kind: SampleKind::Manifest,
            url: "https://example.com/manifest.m3u8".to_string(),
            outcome: Outcome::HttpError(503),
            ttfb_ms: None,
            total_ms: 10,
            bytes: 0,
            declared_duration_ms: None,
        }
    }

    #[test]
    fn green_when_all_ok() {
        let cfg = Config::default();
        let t0 = Instant::now();
        let window = vec![
            ok_sample(t0, SampleKind::Manifest, 50),
            ok_sample(t0, SampleKind::Segment, 80),
        ];
        let mut tracker = HysteresisTracker::new();
        let (snap, _) = tracker.evaluate(&window, &cfg, t0);
        assert_eq!(snap.state, HealthState::Green);
    }

    #[test]
    fn red_on_three_consecutive_failures() {
        let cfg = Config::default();
        let t0 = Instant::now();
        let window = vec![
            failing_sample(t0),
            failing_sample(t0),
            failing_sample(t0),
        ];
        let mut tracker = HysteresisTracker::new();
        let (snap, transition) = tracker.evaluate(&window, &cfg, t0);
        assert_eq!(snap.state, HealthState::Red);
        assert!(transition.is_some());
        assert!(snap.reason.contains("consecutive"));
    }

    #[test]
    fn yellow_on_high_ttfb() {
        let cfg = Config::default();
        let t0 = Instant::now();
        let window: Vec<_> = (0..5)
            .map(|_| ok_sample(t0, SampleKind::Segment, 700))
            .collect();
        let mut tracker = HysteresisTracker::new();
        let (snap, _) = tracker.evaluate(&window, &cfg, t0);
        assert_eq!(snap.state, HealthState::Yellow);
        assert!(snap.reason.contains("700"));
    }

    #[test]
    fn brief_yellow_flip_collapses_without_transition() {
        let cfg = Config::default();
        let t0 = Instant::now();
        let mut tracker = HysteresisTracker::new();

        let green = vec![ok_sample(t0, SampleKind::Segment, 100)];
        tracker.evaluate(&green, &cfg, t0);

        let yellow: Vec<_> = (0..5).map(|_| ok_sample(t0, SampleKind::Segment, 700)).collect();
        let (snap, transition) = tracker.evaluate(&yellow, &cfg, t0 + Duration::from_secs(5));
        assert_eq!(snap.state, HealthState::Yellow);
        assert!(transition.is_some());

        let back_to_green = vec![ok_sample(t0, SampleKind::Segment, 100)];
        let (snap, transition) =
            tracker.evaluate(&back_to_green, &cfg, t0 + Duration::from_secs(10));
        assert_eq!(snap.state, HealthState::Green);
        assert!(transition.is_none(), "flip within 30s should collapse");
    }
}
