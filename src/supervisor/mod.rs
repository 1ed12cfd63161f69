//! Stream Supervisor (C7, §4.7). One task per stream: poll the manifest,
//! pick a segment, probe it, evaluate health, forward to the incident
//! manager, and periodically capture a thumbnail. Owns the tick loop and the
//! restart-with-backoff lifecycle; everything else in the pipeline is driven
//! by this task rather than driving itself.

use crate::classifier;
use crate::config::Config;
use crate::health::HysteresisTracker;
use crate::incident::{IncidentAction, IncidentManager};
use crate::parser::{self, ParsedManifest};
use crate::probe::{ProbeRequest, Prober};
use crate::store::MetricRing;
use crate::thumbnail::ThumbnailCapture;
use crate::types::{
    HealthSnapshot, HealthState, Incident, IncidentId, MetricSample, RootCause, SampleKind,
    Stream, StreamId, TimelineEventKind, Transition, WindowStats,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Supervisor lifecycle state (§4.7), exposed to the Registry for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Fan-out event emitted by a Supervisor tick, delivered to the Registry's
/// broadcast channel (§4.8, §6).
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    HealthChanged { stream_id: StreamId, snapshot: HealthSnapshot },
    IncidentOpened { stream_id: StreamId, incident: Incident },
    IncidentAcknowledged { stream_id: StreamId, incident_id: IncidentId },
    IncidentResolved { stream_id: StreamId, incident: Incident },
    ThumbnailCaptured { stream_id: StreamId, path: String },
}

struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(s: SupervisorState) -> Self {
        Self(AtomicU8::new(s as u8))
    }
    fn load(&self) -> SupervisorState {
        match self.0.load(Ordering::Acquire) {
            0 => SupervisorState::Init,
            1 => SupervisorState::Running,
            2 => SupervisorState::Stopping,
            _ => SupervisorState::Stopped,
        }
    }
    fn store(&self, s: SupervisorState) {
        self.0.store(s as u8, Ordering::Release);
    }
}

/// Shared, lock-guarded state a Supervisor's task owns and the Registry reads
/// from concurrently: the metric ring, the health tracker, and the incident
/// manager all live behind `parking_lot` locks so reads never await.
pub struct StreamHandle {
    pub stream: Stream,
    pub ring: Arc<MetricRing>,
    health: parking_lot::RwLock<HysteresisTracker>,
    incidents: parking_lot::Mutex<IncidentManager>,
    state: AtomicState,
    cancel: CancellationToken,
}

impl StreamHandle {
    fn new(stream: Stream, cfg: &Config) -> Self {
        Self {
            ring: Arc::new(MetricRing::new(cfg.ring_capacity())),
            health: parking_lot::RwLock::new(HysteresisTracker::new()),
            incidents: parking_lot::Mutex::new(IncidentManager::new(stream.id)),
            state: AtomicState::new(SupervisorState::Init),
            cancel: CancellationToken::new(),
            stream,
        }
    }

    pub fn health_snapshot(&self) -> Option<HealthSnapshot> {
        self.health.read().latest().cloned()
    }

    pub fn active_incident(&self) -> Option<Incident> {
        self.incidents.lock().active_incident().cloned()
    }

    pub fn resolved_incidents(&self) -> Vec<Incident> {
        self.incidents.lock().resolved_incidents().cloned().collect()
    }

    pub fn acknowledge(&self, id: IncidentId, cfg: &Config) -> IncidentAction {
        self.incidents.lock().acknowledge(id, cfg)
    }

    pub fn state(&self) -> SupervisorState {
        self.state.load()
    }

    pub fn root_cause(&self, cfg: &Config) -> RootCause {
        let window = self.ring.window(Instant::now(), cfg.window_short());
        classifier::classify(&window)
    }

    pub fn request_stop(&self) {
        self.state.store(SupervisorState::Stopping);
        self.cancel.cancel();
    }
}

/// Spawn a Supervisor task for `stream`. Returns the shared handle used by
/// the Registry for reads/acknowledge, plus the joinable task.
pub fn spawn(
    stream: Stream,
    cfg: Arc<Config>,
    prober: Arc<dyn Prober>,
    thumbnailer: Arc<dyn ThumbnailCapture>,
    events: broadcast::Sender<SupervisorEvent>,
) -> (Arc<StreamHandle>, tokio::task::JoinHandle<()>) {
    let handle = Arc::new(StreamHandle::new(stream, &cfg));
    let task_handle = handle.clone();
    let join = tokio::task::spawn(run(task_handle, cfg, prober, thumbnailer, events));
    (handle, join)
}

/// The supervised tick loop with exponential backoff restart (§4.7, §5):
/// 1s/2s/4s/... capped at 30s. A synthetic RED snapshot is published while a
/// restart is pending so readers never see a stale GREEN during an outage of
/// the supervisor task itself.
async fn run(
    handle: Arc<StreamHandle>,
    cfg: Arc<Config>,
    prober: Arc<dyn Prober>,
    thumbnailer: Arc<dyn ThumbnailCapture>,
    events: broadcast::Sender<SupervisorEvent>,
) {
    handle.state.store(SupervisorState::Running);
    let mut backoff = Duration::from_secs(1);
    let mut tick_count: u64 = 0;

    loop {
        if handle.cancel.is_cancelled() {
            break;
        }

        let outcome = AssertUnwindSafe(tick(&handle, &cfg, &prober, &thumbnailer, &events, tick_count))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) => {
                backoff = Duration::from_secs(1);
                tick_count += 1;
            }
            Err(panic) => {
                let reason = panic_message(&panic);
                warn!(stream_id = %handle.stream.id, reason = %reason, backoff_s = backoff.as_secs(), "supervisor tick panicked, restarting after backoff");
                publish_synthetic_red(&handle, &events, &reason);
                let slept = tokio::select! {
                    biased;
                    _ = handle.cancel.cancelled() => false,
                    _ = tokio::time::sleep(backoff) => true,
                };
                if !slept {
                    break;
                }
                backoff = (backoff * 2).min(Duration::from_secs(30));
                continue;
            }
        }

        let slept = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => false,
            _ = tokio::time::sleep(cfg.poll_interval()) => true,
        };
        if !slept {
            break;
        }
    }

    handle.state.store(SupervisorState::Stopped);
    info!(stream_id = %handle.stream.id, "supervisor stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One pass: probe the manifest, probe a segment if one is available,
/// evaluate health, forward to the incident manager, and capture a
/// thumbnail every `thumbnail_every_k` ticks (§4.7). A tick never returns an
/// error: probe and parse failures are recorded as samples/skip-steps, per
/// the "failures are data" contract (§3) — the only thing that can abort the
/// loop is cancellation.
async fn tick(
    handle: &Arc<StreamHandle>,
    cfg: &Config,
    prober: &Arc<dyn Prober>,
    thumbnailer: &Arc<dyn ThumbnailCapture>,
    events: &broadcast::Sender<SupervisorEvent>,
    tick_count: u64,
) {
    let manifest_req = ProbeRequest {
        url: handle.stream.manifest_url.clone(),
        kind: SampleKind::Manifest,
        declared_duration_ms: None,
    };
    let (manifest_sample, manifest_body) = prober
        .probe(&manifest_req, cfg.probe_timeout(), &handle.cancel)
        .await;
    let manifest_ok = manifest_sample.outcome.is_ok();
    handle.ring.append(manifest_sample.clone());
    record_outcome_timeline(handle, cfg, &manifest_sample, TimelineEventKind::ManifestFail);

    if let Some(body) = manifest_body.filter(|_| manifest_ok) {
        if let Some((url, declared_duration_ms)) = resolve_segment_target(handle, cfg, prober, &body).await {
            let segment_req = ProbeRequest {
                url,
                kind: SampleKind::Segment,
                declared_duration_ms: Some(declared_duration_ms),
            };
            let (segment_sample, _body) = prober
                .probe(&segment_req, cfg.probe_timeout(), &handle.cancel)
                .await;
            handle.ring.append(segment_sample.clone());
            record_outcome_timeline(handle, cfg, &segment_sample, TimelineEventKind::SegmentFail);
        }
    }

    let now = Instant::now();
    let window = handle.ring.window(now, cfg.window_short());
    let (snapshot, _transition) = handle.health.write().evaluate(&window, cfg, now);
    handle.ring.record_transition(now, snapshot.state);
    let _ = events.send(SupervisorEvent::HealthChanged {
        stream_id: handle.stream.id,
        snapshot: snapshot.clone(),
    });

    // The Incident Manager's YELLOW-persistence and GREEN-hold timers are
    // evaluated every tick, not only when the Evaluator reports a reportable
    // transition (hysteresis can collapse a brief flip into "no transition"
    // while the state itself still needs to be re-checked against a timer).
    forward_transition(
        handle,
        cfg,
        &Transition { from: snapshot.state, to: snapshot.state, at: now },
        events,
    );

    if cfg.thumbnail_every_k > 0 && tick_count % cfg.thumbnail_every_k as u64 == 0 {
        maybe_capture_thumbnail(handle, cfg, thumbnailer, events).await;
    }

    debug!(stream_id = %handle.stream.id, state = ?snapshot.state, "tick complete");
}

fn record_outcome_timeline(
    handle: &Arc<StreamHandle>,
    cfg: &Config,
    sample: &MetricSample,
    fail_kind: TimelineEventKind,
) {
    let (kind, message) = if sample.outcome.is_ok() {
        (TimelineEventKind::SegmentOk, format!("{:?} ok in {} ms", sample.kind, sample.total_ms))
    } else {
        (fail_kind, format!("{:?} failed: {:?}", sample.kind, sample.outcome))
    };
    handle.incidents.lock().on_outcome(kind, message, cfg);
}

/// Resolve which segment URL to probe this tick, per §4.7 step 2: parse the
/// manifest body already fetched by this tick's manifest probe (following a
/// master playlist's highest-bandwidth variant first, which *does* need its
/// own fetch since it's a different URL), then pick the second-most-recent
/// segment.
async fn resolve_segment_target(
    handle: &Arc<StreamHandle>,
    cfg: &Config,
    prober: &Arc<dyn Prober>,
    manifest_body: &[u8],
) -> Option<(String, u32)> {
    let parsed = parser::parse(manifest_body, &handle.stream.manifest_url).ok()?;

    let media = match parsed {
        ParsedManifest::Media(media) => media,
        ParsedManifest::Master(master) => {
            let variant = master.highest_bandwidth()?;
            let variant_url = variant.absolute_uri.to_string();
            let body = prober
                .fetch_body(&variant_url, cfg.probe_timeout(), &handle.cancel)
                .await?;
            match parser::parse(&body, &variant_url).ok()? {
                ParsedManifest::Media(media) => media,
                ParsedManifest::Master(_) => return None,
            }
        }
    };

    let segment = media.second_most_recent()?;
    let declared_ms = (segment.duration_sec * 1000.0).round() as u32;
    Some((segment.absolute_uri.to_string(), declared_ms))
}

fn forward_transition(
    handle: &Arc<StreamHandle>,
    cfg: &Config,
    transition: &Transition,
    events: &broadcast::Sender<SupervisorEvent>,
) {
    let action = handle
        .incidents
        .lock()
        .on_transition(transition, cfg, transition.at);

    match action {
        IncidentAction::Opened(_) => {
            if let Some(incident) = handle.active_incident() {
                let _ = events.send(SupervisorEvent::IncidentOpened {
                    stream_id: handle.stream.id,
                    incident,
                });
            }
        }
        IncidentAction::Resolved(_) => {
            if let Some(incident) = handle.resolved_incidents().into_iter().last() {
                let _ = events.send(SupervisorEvent::IncidentResolved {
                    stream_id: handle.stream.id,
                    incident,
                });
            }
        }
        IncidentAction::Acknowledged(id) => {
            let _ = events.send(SupervisorEvent::IncidentAcknowledged {
                stream_id: handle.stream.id,
                incident_id: id,
            });
        }
        IncidentAction::None => {}
    }
}

async fn maybe_capture_thumbnail(
    handle: &Arc<StreamHandle>,
    cfg: &Config,
    thumbnailer: &Arc<dyn ThumbnailCapture>,
    events: &broadcast::Sender<SupervisorEvent>,
) {
    let Some(latest_ok) = handle
        .ring
        .latest()
        .filter(|s| s.kind == SampleKind::Segment && s.outcome.is_ok())
    else {
        return;
    };
    match thumbnailer.capture(handle.stream.id, &latest_ok.url, cfg).await {
        Ok(path) => {
            handle.incidents.lock().on_outcome(
                TimelineEventKind::ThumbnailCaptured,
                format!("thumbnail captured to {path}"),
                cfg,
            );
            let _ = events.send(SupervisorEvent::ThumbnailCaptured {
                stream_id: handle.stream.id,
                path,
            });
        }
        Err(err) => {
            debug!(stream_id = %handle.stream.id, error = %err, "thumbnail capture skipped");
        }
    }
}

/// Publish a synthetic RED snapshot while the Supervisor task itself is down
/// and waiting out a backoff (§4.7).
fn publish_synthetic_red(handle: &Arc<StreamHandle>, events: &broadcast::Sender<SupervisorEvent>, reason: &str) {
    let now = Instant::now();
    let snapshot = HealthSnapshot {
        state: HealthState::Red,
        reason: format!("supervisor task failed: {reason}"),
        updated_at: chrono::Utc::now(),
        window_stats: WindowStats {
            error_count: 0,
            sample_count: 0,
            avg_ttfb_ms: None,
            avg_download_ratio: None,
        },
    };
    handle.health.write().force_state(snapshot.clone(), now);
    let _ = events.send(SupervisorEvent::HealthChanged {
        stream_id: handle.stream.id,
        snapshot,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{MockProber, ScriptedProbe};
    use crate::thumbnail::NoopThumbnailCapture;

    fn test_stream() -> Stream {
        Stream {
            id: StreamId::new(),
            name: "test".to_string(),
            manifest_url: "https://cdn.example.com/stream/master.m3u8".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_tick_records_manifest_sample_and_green_health() {
        let cfg = Arc::new(Config::default());
        let stream = test_stream();
        let mock = Arc::new(MockProber::new());
        mock.push(&stream.manifest_url, ScriptedProbe::ok(30, 80));
        let prober: Arc<dyn Prober> = mock;
        let (events, _rx) = broadcast::channel(16);
        let thumbnailer: Arc<dyn ThumbnailCapture> = Arc::new(NoopThumbnailCapture);

        let handle = Arc::new(StreamHandle::new(stream, &cfg));

        tick(&handle, &cfg, &prober, &thumbnailer, &events, 0).await;

        assert!(handle.ring.latest().is_some());
        assert_eq!(handle.health_snapshot().unwrap().state, HealthState::Green);
    }

    #[tokio::test]
    async fn missing_manifest_body_skips_segment_step_without_panicking() {
        let cfg = Arc::new(Config::default());
        let stream = test_stream();
        let mock = Arc::new(MockProber::new());
        mock.push(&stream.manifest_url, ScriptedProbe::ok(30, 80));
        // no set_body(): the manifest probe returns no body, segment step is skipped.
        let prober: Arc<dyn Prober> = mock;
        let (events, _rx) = broadcast::channel(16);
        let thumbnailer: Arc<dyn ThumbnailCapture> = Arc::new(NoopThumbnailCapture);
        let handle = Arc::new(StreamHandle::new(stream, &cfg));

        tick(&handle, &cfg, &prober, &thumbnailer, &events, 0).await;

        assert_eq!(handle.ring.window(Instant::now(), cfg.window_long()).len(), 1);
    }

    #[tokio::test]
    async fn manifest_is_probed_once_per_tick_even_when_segment_is_resolved() {
        let cfg = Arc::new(Config::default());
        let stream = test_stream();
        let mock = Arc::new(MockProber::new());
        mock.push(&stream.manifest_url, ScriptedProbe::ok(30, 80));
        mock.set_body(
            &stream.manifest_url,
            b"#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:6.0,\nseg1.ts\n#EXTINF:6.0,\nseg2.ts\n"
                .to_vec(),
        );
        mock.push("https://cdn.example.com/stream/seg1.ts", ScriptedProbe::ok(40, 200));
        let mock_ref = mock.clone();
        let prober: Arc<dyn Prober> = mock;
        let (events, _rx) = broadcast::channel(16);
        let thumbnailer: Arc<dyn ThumbnailCapture> = Arc::new(NoopThumbnailCapture);
        let handle = Arc::new(StreamHandle::new(stream.clone(), &cfg));

        tick(&handle, &cfg, &prober, &thumbnailer, &events, 0).await;

        // the manifest GET must drive both the health sample and segment
        // selection without being fetched a second time.
        assert_eq!(mock_ref.probe_count(&stream.manifest_url), 1);
        assert_eq!(handle.ring.window(Instant::now(), cfg.window_long()).len(), 2);
    }
}
