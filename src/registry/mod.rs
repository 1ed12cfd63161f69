//! Registry & Snapshot API (C8, §4.8). Owns the set of supervised streams
//! and is the sole entry point the outer surface (CLI/API) talks to. Reads
//! return owned, point-in-time snapshots built from each stream's
//! [`StreamHandle`] — never a shared reference into live state (§8 invariant
//! 2) — so a caller can hold one across an await point indefinitely.

mod persist;

pub use persist::{ConfigStore, StoredStream};

use crate::config::Config;
use crate::error::RegistryError;
use crate::incident::IncidentAction;
use crate::probe::Prober;
use crate::store::HistoryPayload;
use crate::supervisor::{self, StreamHandle, SupervisorEvent, SupervisorState};
use crate::thumbnail::{self, ThumbnailCapture};
use crate::types::{HealthSnapshot, Incident, IncidentId, RootCause, Stream, StreamId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Cadence for the thumbnail-directory maintenance task (§5). Independent of
/// any per-stream polling cadence — this is housekeeping, not observation.
const THUMBNAIL_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Lightweight row for a fleet-wide listing (§4.8 `list_streams`).
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub stream: Stream,
    pub health: Option<HealthSnapshot>,
    pub has_active_incident: bool,
    pub supervisor_state: SupervisorState,
}

/// Full detail view for a single stream (§4.8 `get_stream`).
#[derive(Debug, Clone)]
pub struct StreamDetail {
    pub stream: Stream,
    pub health: Option<HealthSnapshot>,
    pub active_incident: Option<Incident>,
    pub resolved_incidents: Vec<Incident>,
    pub root_cause: Option<RootCause>,
    pub supervisor_state: SupervisorState,
}

struct Entry {
    handle: Arc<StreamHandle>,
    join: tokio::task::JoinHandle<()>,
}

/// Owns every supervised stream and fans out [`SupervisorEvent`]s to
/// subscribers (§6). The map itself is a `tokio::sync::RwLock` — coarser
/// than the per-stream `parking_lot` locks inside [`StreamHandle`] — since
/// create/delete are rare relative to the high-frequency per-stream reads
/// that never need to touch the map at all.
pub struct Registry {
    cfg: Arc<Config>,
    prober: Arc<dyn Prober>,
    thumbnailer: Arc<dyn ThumbnailCapture>,
    streams: RwLock<HashMap<StreamId, Entry>>,
    events: broadcast::Sender<SupervisorEvent>,
    sweep_task: Option<tokio::task::JoinHandle<()>>,
}

impl Registry {
    pub fn new(cfg: Config, prober: Arc<dyn Prober>, thumbnailer: Arc<dyn ThumbnailCapture>) -> Self {
        let (events, _rx) = broadcast::channel(1024);
        let cfg = Arc::new(cfg);
        let sweep_task = thumbnailer.output_dir().map(|dir| {
            let dir = dir.to_path_buf();
            let cfg = cfg.clone();
            tokio::task::spawn(async move {
                let mut ticker = tokio::time::interval(THUMBNAIL_SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    match thumbnail::sweep_old_thumbnails(&dir, &cfg).await {
                        Ok(removed) if removed > 0 => info!(removed, "thumbnail sweep removed stale files"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "thumbnail sweep failed"),
                    }
                }
            })
        });
        Self {
            cfg,
            prober,
            thumbnailer,
            streams: RwLock::new(HashMap::new()),
            events,
            sweep_task,
        }
    }

    /// Subscribe to the fleet-wide event stream (§6). Lagging subscribers
    /// drop the oldest unread events rather than block producers.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Register a new stream and spawn its Supervisor task (§4.8
    /// `create_stream`). Rejects a duplicate `manifest_url` (§8 invariant 6).
    pub async fn create_stream(&self, name: String, manifest_url: String) -> Result<StreamId, RegistryError> {
        if manifest_url.trim().is_empty() {
            return Err(RegistryError::MissingManifestUrl);
        }
        url::Url::parse(&manifest_url).map_err(RegistryError::InvalidManifestUrl)?;

        let mut streams = self.streams.write().await;
        if streams
            .values()
            .any(|e| e.handle.stream.manifest_url == manifest_url)
        {
            return Err(RegistryError::DuplicateStream(manifest_url));
        }

        let stream = Stream {
            id: StreamId::new(),
            name,
            manifest_url,
            created_at: chrono::Utc::now(),
        };
        let id = stream.id;

        let (handle, join) = supervisor::spawn(
            stream,
            self.cfg.clone(),
            self.prober.clone(),
            self.thumbnailer.clone(),
            self.events.clone(),
        );
        streams.insert(id, Entry { handle, join });
        info!(stream_id = %id, "stream registered");
        Ok(id)
    }

    /// Stop and remove a stream (§4.8 `delete_stream`). Blocks until the
    /// Supervisor task reaches STOPPED or `grace_timeout_s` elapses (§5),
    /// force-aborting only on timeout; no trace of the stream remains in any
    /// subsequent listing either way. The registry lock is released before
    /// waiting so other streams' reads/creates aren't blocked by this one's
    /// shutdown.
    pub async fn delete_stream(&self, id: StreamId) -> Result<(), RegistryError> {
        let entry = {
            let mut streams = self.streams.write().await;
            streams.remove(&id).ok_or(RegistryError::UnknownStream(id))?
        };
        entry.handle.request_stop();
        let abort_handle = entry.join.abort_handle();
        if tokio::time::timeout(self.cfg.grace_timeout(), entry.join).await.is_err() {
            warn!(stream_id = %id, "supervisor did not reach STOPPED within the grace timeout, aborting");
            abort_handle.abort();
        }
        info!(stream_id = %id, "stream removed");
        Ok(())
    }

    pub async fn list_streams(&self) -> Vec<StreamSummary> {
        let streams = self.streams.read().await;
        streams
            .values()
            .map(|e| StreamSummary {
                stream: e.handle.stream.clone(),
                health: e.handle.health_snapshot(),
                has_active_incident: e.handle.active_incident().is_some(),
                supervisor_state: e.handle.state(),
            })
            .collect()
    }

    pub async fn get_stream(&self, id: StreamId) -> Result<StreamDetail, RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams.get(&id).ok_or(RegistryError::UnknownStream(id))?;
        let root_cause = if entry.handle.active_incident().is_some() {
            Some(entry.handle.root_cause(&self.cfg))
        } else {
            None
        };
        Ok(StreamDetail {
            stream: entry.handle.stream.clone(),
            health: entry.handle.health_snapshot(),
            active_incident: entry.handle.active_incident(),
            resolved_incidents: entry.handle.resolved_incidents(),
            root_cause,
            supervisor_state: entry.handle.state(),
        })
    }

    pub async fn get_history(&self, id: StreamId, window: Duration) -> Result<HistoryPayload, RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams.get(&id).ok_or(RegistryError::UnknownStream(id))?;
        Ok(entry.handle.ring.history(Instant::now(), window))
    }

    /// All incidents (active and resolved, most recent first) for a stream
    /// (§4.8 `list_incidents`).
    pub async fn list_incidents(&self, id: StreamId) -> Result<Vec<Incident>, RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams.get(&id).ok_or(RegistryError::UnknownStream(id))?;
        let mut incidents = entry.handle.resolved_incidents();
        if let Some(active) = entry.handle.active_incident() {
            incidents.push(active);
        }
        incidents.sort_by_key(|i| i.opened_at);
        incidents.reverse();
        Ok(incidents)
    }

    pub async fn acknowledge_incident(&self, stream_id: StreamId, incident_id: IncidentId) -> Result<(), RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams.get(&stream_id).ok_or(RegistryError::UnknownStream(stream_id))?;
        match entry.handle.acknowledge(incident_id, &self.cfg) {
            IncidentAction::Acknowledged(_) => {
                let _ = self.events.send(SupervisorEvent::IncidentAcknowledged {
                    stream_id,
                    incident_id,
                });
                Ok(())
            }
            IncidentAction::None if entry.handle.active_incident().map(|i| i.id) == Some(incident_id) => Ok(()),
            _ => Err(RegistryError::UnknownIncident(incident_id)),
        }
    }

    /// Stop every Supervisor task, used on process shutdown. Each task gets
    /// up to `grace_timeout_s` to reach STOPPED, waited on concurrently
    /// rather than per-stream, before being force-aborted (§5).
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = {
            let mut streams = self.streams.write().await;
            streams.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.handle.request_stop();
        }

        let grace = self.cfg.grace_timeout();
        let joins = entries.into_iter().map(|entry| async move {
            let abort_handle = entry.join.abort_handle();
            if tokio::time::timeout(grace, entry.join).await.is_err() {
                abort_handle.abort();
            }
        });
        futures::future::join_all(joins).await;

        if let Some(task) = &self.sweep_task {
            task.abort();
        }
        info!("registry shutdown complete");
    }
}
