//! Root-Cause Classifier (C6, §4.6). Pure and stateless: reads the current
//! window and the most recent manifest outcome, applies the priority-ordered
//! rule table, first match wins.

use crate::types::{Confidence, MetricSample, Outcome, RootCause, RootCauseLabel, SampleKind};

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Classify the window per the rule table in §4.6.
pub fn classify(window: &[MetricSample]) -> RootCause {
    let manifests: Vec<&MetricSample> = window
        .iter()
        .filter(|s| s.kind == SampleKind::Manifest)
        .collect();
    let manifest_ok = manifests.last().map(|s| s.outcome.is_ok()).unwrap_or(true);

    let consecutive_manifest_failures = manifests
        .iter()
        .rev()
        .take_while(|s| !s.outcome.is_ok())
        .count();

    // Rule 1: most recent manifest probe not ok, with >=2 consecutive
    // failures -> Origin/CDN Outage, HIGH.
    if !manifest_ok && consecutive_manifest_failures >= 2 {
        let evidence = vec![format!(
            "{} consecutive manifest probe failures",
            consecutive_manifest_failures
        )];
        return RootCause {
            label: RootCauseLabel::OriginCdnOutage,
            confidence: Some(Confidence::High),
            evidence,
        };
    }

    let segment_http_errors = window
        .iter()
        .filter(|s| s.kind == SampleKind::Segment && matches!(s.outcome, Outcome::HttpError(_)))
        .count();

    // Rule 2: manifest_ok AND >=3 segment http_errors -> Encoder/Packager
    // Issue, MEDIUM.
    if manifest_ok && segment_http_errors >= 3 {
        let evidence = vec![format!(
            "{} segment HTTP errors, manifest ok",
            segment_http_errors
        )];
        return RootCause {
            label: RootCauseLabel::EncoderPackagerIssue,
            confidence: Some(Confidence::Medium),
            evidence,
        };
    }

    let ttfbs: Vec<f64> = window
        .iter()
        .filter(|s| s.outcome.is_ok())
        .filter_map(|s| s.ttfb_ms)
        .map(|v| v as f64)
        .collect();
    let avg_ttfb = mean(&ttfbs);
    let ratios: Vec<f64> = window.iter().filter_map(|s| s.download_ratio()).collect();
    let avg_ratio = mean(&ratios);

    // Rule 3: avg_ttfb > 800ms AND avg_ratio > 1.0 -> Network Congestion, MEDIUM.
    if let (Some(ttfb), Some(ratio)) = (avg_ttfb, avg_ratio) {
        if ttfb > 800.0 && ratio > 1.0 {
            return RootCause {
                label: RootCauseLabel::NetworkCongestion,
                confidence: Some(Confidence::Medium),
                evidence: vec![
                    format!("Avg TTFB {:.0} ms", ttfb),
                    format!("Avg download ratio {:.2}", ratio),
                ],
            };
        }
    }

    // Rule 4: avg_ttfb > 500ms AND avg_ratio <= 1.0 -> CDN Edge Latency, LOW.
    if let Some(ttfb) = avg_ttfb {
        let ratio_ok = avg_ratio.map(|r| r <= 1.0).unwrap_or(true);
        if ttfb > 500.0 && ratio_ok {
            return RootCause {
                label: RootCauseLabel::CdnEdgeLatency,
                confidence: Some(Confidence::Low),
                evidence: vec![format!("Avg TTFB {:.0} ms", ttfb)],
            };
        }
    }

    // Rule 5: err_rate > 0 and no other rule matched -> Intermittent
    // Failures, LOW.
    let error_count = window.iter().filter(|s| !s.outcome.is_ok()).count();
    if !window.is_empty() && error_count > 0 {
        return RootCause {
            label: RootCauseLabel::IntermittentFailures,
            confidence: Some(Confidence::Low),
            evidence: vec![format!(
                "{} of {} probes failed with no single dominant pattern",
                error_count,
                window.len()
            )],
        };
    }

    // Rule 6: otherwise -> Insufficient Evidence, no confidence.
    RootCause {
        label: RootCauseLabel::InsufficientEvidence,
        confidence: None,
        evidence: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn manifest(outcome: Outcome) -> MetricSample {
        MetricSample {
            seq: 0,
            at: Instant::now(),
            wall_clock: chrono::Utc::now(),
            kind: SampleKind::Manifest,
            url: "https://example.com/master.m3u8".to_string(),
            outcome,
            ttfb_ms: outcome.is_ok().then_some(50),
            total_ms: 60,
            bytes: if outcome.is_ok() { 500 } else { 0 },
            declared_duration_ms: None,
        }
    }

    fn segment(outcome: Outcome, ttfb: u32, total: u32, declared: u32) -> MetricSample {
        MetricSample {
            seq: 0,
            at: Instant::now(),
            wall_clock: chrono::Utc::now(),
            kind: SampleKind::Segment,
            url: "https://example.com/seg.ts".to_string(),
            outcome,
            ttfb_ms: outcome.is_ok().then_some(ttfb),
            total_ms: total,
            bytes: 1000,
            declared_duration_ms: Some(declared),
        }
    }

    #[test]
    fn classifies_origin_outage() {
        let window = vec![manifest(Outcome::HttpError(503)), manifest(Outcome::HttpError(503))];
        let rc = classify(&window);
        assert_eq!(rc.label, RootCauseLabel::OriginCdnOutage);
        assert_eq!(rc.confidence, Some(Confidence::High));
    }

    #[test]
    fn classifies_encoder_issue() {
        let mut window = vec![manifest(Outcome::Ok)];
        for _ in 0..4 {
            window.push(segment(Outcome::HttpError(404), 0, 0, 6000));
        }
        let rc = classify(&window);
        assert_eq!(rc.label, RootCauseLabel::EncoderPackagerIssue);
        assert_eq!(rc.confidence, Some(Confidence::Medium));
        assert!(rc.evidence[0].contains("4 segment HTTP errors"));
        assert!(rc.evidence[0].contains("manifest ok"));
    }

    #[test]
    fn classifies_cdn_edge_latency() {
        let mut window = vec![manifest(Outcome::Ok)];
        for _ in 0..5 {
            window.push(segment(Outcome::Ok, 700, 4200, 6000));
        }
        let rc = classify(&window);
        assert_eq!(rc.label, RootCauseLabel::CdnEdgeLatency);
        assert_eq!(rc.confidence, Some(Confidence::Low));
    }

    #[test]
    fn classification_is_deterministic() {
        let window = vec![manifest(Outcome::HttpError(503)), manifest(Outcome::HttpError(503))];
        let a = classify(&window);
        let b = classify(&window);
        assert_eq!(a.label, b.label);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.evidence, b.evidence);
    }

    #[test]
    fn insufficient_evidence_when_all_healthy() {
        let window = vec![manifest(Outcome::Ok), segment(Outcome::Ok, 50, 300, 6000)];
        let rc = classify(&window);
        assert_eq!(rc.label, RootCauseLabel::InsufficientEvidence);
        assert_eq!(rc.confidence, None);
    }
}
