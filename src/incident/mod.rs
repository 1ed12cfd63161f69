//! Incident Manager (C5, §4.5). Consumes health transitions and appends to
//! a per-stream incident timeline. The only component permitted to mutate
//! incident state; CPU-only, no suspension points (§5) — hold timers are
//! deadlines checked against each new transition rather than spawned tasks.

use crate::config::Config;
use crate::types::{
    HealthState, Incident, IncidentId, IncidentStatus, StreamId, TimelineEvent, TimelineEventKind,
    Transition,
};
use std::collections::VecDeque;
use std::time::Instant;

/// Per-stream incident state: at most one active (OPEN/ACKNOWLEDGED)
/// incident, plus a bounded FIFO of resolved ones (§4.5, §8 invariant 3).
pub struct IncidentManager {
    stream_id: StreamId,
    active: Option<Incident>,
    resolved: VecDeque<Incident>,
    next_timeline_id: u64,
    yellow_since: Option<Instant>,
    green_since: Option<Instant>,
}

/// What happened as a result of feeding a transition/outcome into the
/// manager, surfaced to the Registry for event fan-out (§4.8).
#[derive(Debug, Clone)]
pub enum IncidentAction {
    Opened(IncidentId),
    Acknowledged(IncidentId),
    Resolved(IncidentId),
    None,
}

impl IncidentManager {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            active: None,
            resolved: VecDeque::new(),
            next_timeline_id: 0,
            yellow_since: None,
            green_since: None,
        }
    }

    pub fn active_incident(&self) -> Option<&Incident> {
        self.active.as_ref()
    }

    pub fn resolved_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.resolved.iter()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_timeline_id;
        self.next_timeline_id += 1;
        id
    }

    fn push_timeline(&mut self, kind: TimelineEventKind, message: String, cap: usize) {
        let id = self.next_id();
        let event = TimelineEvent {
            id,
            ts: chrono::Utc::now(),
            kind,
            message,
        };
        if let Some(incident) = self.active.as_mut() {
            incident.timeline.push(event);
            // Drop-oldest within an incident beyond the cap, preserving the
            // open (first) event and the latest ones (§5): always keep
            // index 0, evict from index 1 onward.
            while incident.timeline.len() > cap.max(2) {
                incident.timeline.remove(1);
            }
        }
    }

    /// Feed a health transition into the manager. Returns the action taken,
    /// if any (§4.5).
    pub fn on_transition(&mut self, transition: &Transition, cfg: &Config, now: Instant) -> IncidentAction {
        match transition.to {
            HealthState::Red => {
                self.yellow_since = None;
                self.green_since = None;
                self.on_red(now, cfg)
            }
            HealthState::Yellow => {
                self.green_since = None;
                if self.yellow_since.is_none() {
                    self.yellow_since = Some(now);
                }
                self.maybe_open_on_sustained_yellow(now, cfg)
            }
            HealthState::Green => {
                self.yellow_since = None;
                if self.green_since.is_none() {
                    self.green_since = Some(now);
                }
                self.maybe_resolve_on_sustained_green(now, cfg)
            }
        }
    }

    /// Forward a segment/manifest outcome as a timeline append to an already
    /// active incident (§4.5 "append to the existing timeline").
    pub fn on_outcome(&mut self, kind: TimelineEventKind, message: String, cfg: &Config) {
        if self.active.is_some() {
            self.push_timeline(kind, message, cfg.timeline_cap);
        }
    }

    fn on_red(&mut self, now: Instant, cfg: &Config) -> IncidentAction {
        if self.active.is_some() {
            self.push_timeline(
                TimelineEventKind::HealthTransition,
                "health transitioned to RED".to_string(),
                cfg.timeline_cap,
            );
            return IncidentAction::None;
        }
        self.open_incident("manifest failing or high error rate (RED)".to_string(), now, cfg)
    }

    fn maybe_open_on_sustained_yellow(&mut self, now: Instant, cfg: &Config) -> IncidentAction {
        if self.active.is_some() {
            self.push_timeline(
                TimelineEventKind::HealthTransition,
                "health transitioned to YELLOW".to_string(),
                cfg.timeline_cap,
            );
            return IncidentAction::None;
        }
        match self.yellow_since {
            Some(since) if now.duration_since(since) >= cfg.yellow_persistence() => {
                self.open_incident("sustained YELLOW health".to_string(), now, cfg)
            }
            _ => IncidentAction::None,
        }
    }

    fn maybe_resolve_on_sustained_green(&mut self, now: Instant, cfg: &Config) -> IncidentAction {
        let Some(since) = self.green_since else {
            return IncidentAction::None;
        };
        if now.duration_since(since) < cfg.resolve_hold() {
            return IncidentAction::None;
        }
        self.resolve_active(now, cfg)
    }

    fn open_incident(&mut self, reason: String, now: Instant, cfg: &Config) -> IncidentAction {
        let id = IncidentId::new();
        let opened_event = TimelineEvent {
            id: 0,
            ts: chrono::Utc::now(),
            kind: TimelineEventKind::IncidentOpened,
            message: reason.clone(),
        };
        self.next_timeline_id = 1;
        self.active = Some(Incident {
            id,
            stream_id: self.stream_id,
            status: IncidentStatus::Open,
            opened_at: chrono::Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
            trigger_reason: reason,
            timeline: vec![opened_event],
        });
        let _ = cfg;
        IncidentAction::Opened(id)
    }

    /// Acknowledge the active incident. Idempotent: a second call is a
    /// no-op (§4.5, §8 invariant 4).
    pub fn acknowledge(&mut self, id: IncidentId, cfg: &Config) -> IncidentAction {
        let Some(incident) = self.active.as_mut() else {
            return IncidentAction::None;
        };
        if incident.id != id {
            return IncidentAction::None;
        }
        if incident.status == IncidentStatus::Acknowledged {
            return IncidentAction::None;
        }
        incident.status = IncidentStatus::Acknowledged;
        incident.acknowledged_at = Some(chrono::Utc::now());
        self.push_timeline(
            TimelineEventKind::IncidentAcknowledged,
            "incident acknowledged".to_string(),
            cfg.timeline_cap,
        );
        IncidentAction::Acknowledged(id)
    }

    fn resolve_active(&mut self, _now: Instant, cfg: &Config) -> IncidentAction {
        let Some(mut incident) = self.active.take() else {
            return IncidentAction::None;
        };
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(chrono::Utc::now());
        let id = incident.id;
        let event = TimelineEvent {
            id: incident.timeline.last().map(|e| e.id + 1).unwrap_or(0),
            ts: chrono::Utc::now(),
            kind: TimelineEventKind::IncidentResolved,
            message: "incident resolved after sustained GREEN health".to_string(),
        };
        incident.timeline.push(event);

        self.resolved.push_back(incident);
        while self.resolved.len() > cfg.history_retention {
            self.resolved.pop_front();
        }
        IncidentAction::Resolved(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transition(from: HealthState, to: HealthState, at: Instant) -> Transition {
        Transition { from, to, at }
    }

    #[test]
    fn red_opens_incident_immediately() {
        let cfg = Config::default();
        let mut mgr = IncidentManager::new(StreamId::new());
        let t0 = Instant::now();
        let action = mgr.on_transition(&transition(HealthState::Green, HealthState::Red, t0), &cfg, t0);
        assert!(matches!(action, IncidentAction::Opened(_)));
        assert_eq!(mgr.active_incident().unwrap().status, IncidentStatus::Open);
    }

    #[test]
    fn yellow_opens_only_after_sustained_period() {
        let cfg = Config::default();
        let mut mgr = IncidentManager::new(StreamId::new());
        let t0 = Instant::now();
        let action = mgr.on_transition(&transition(HealthState::Green, HealthState::Yellow, t0), &cfg, t0);
        assert!(matches!(action, IncidentAction::None));
        assert!(mgr.active_incident().is_none());

        let t1 = t0 + cfg.yellow_persistence() + Duration::from_secs(1);
        let action = mgr.on_transition(&transition(HealthState::Yellow, HealthState::Yellow, t1), &cfg, t1);
        assert!(matches!(action, IncidentAction::Opened(_)));
    }

    #[test]
    fn one_active_incident_per_stream() {
        let cfg = Config::default();
        let mut mgr = IncidentManager::new(StreamId::new());
        let t0 = Instant::now();
        mgr.on_transition(&transition(HealthState::Green, HealthState::Red, t0), &cfg, t0);
        let first_id = mgr.active_incident().unwrap().id;
        // further RED signals should not open a second incident
        mgr.on_transition(&transition(HealthState::Red, HealthState::Red, t0 + Duration::from_secs(1)), &cfg, t0 + Duration::from_secs(1));
        assert_eq!(mgr.active_incident().unwrap().id, first_id);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let cfg = Config::default();
        let mut mgr = IncidentManager::new(StreamId::new());
        let t0 = Instant::now();
        mgr.on_transition(&transition(HealthState::Green, HealthState::Red, t0), &cfg, t0);
        let id = mgr.active_incident().unwrap().id;
        let first_len = {
            mgr.acknowledge(id, &cfg);
            mgr.active_incident().unwrap().timeline.len()
        };
        mgr.acknowledge(id, &cfg);
        let second_len = mgr.active_incident().unwrap().timeline.len();
        assert_eq!(first_len, second_len);
        assert_eq!(mgr.active_incident().unwrap().status, IncidentStatus::Acknowledged);
    }

    #[test]
    fn resolve_requires_sustained_green_hold() {
        let cfg = Config::default();
        let mut mgr = IncidentManager::new(StreamId::new());
        let t0 = Instant::now();
        mgr.on_transition(&transition(HealthState::Green, HealthState::Red, t0), &cfg, t0);

        let t1 = t0 + Duration::from_secs(1);
        let action = mgr.on_transition(&transition(HealthState::Red, HealthState::Green, t1), &cfg, t1);
        assert!(matches!(action, IncidentAction::None));
        assert!(mgr.active_incident().is_some());

        // re-entering RED before the hold elapses cancels resolution
        let t2 = t1 + Duration::from_secs(5);
        mgr.on_transition(&transition(HealthState::Green, HealthState::Red, t2), &cfg, t2);
        assert!(mgr.active_incident().is_some());

        let t3 = t2 + Duration::from_secs(1);
        mgr.on_transition(&transition(HealthState::Red, HealthState::Green, t3), &cfg, t3);
        let t4 = t3 + cfg.resolve_hold() + Duration::from_secs(1);
        let action = mgr.on_transition(&transition(HealthState::Green, HealthState::Green, t4), &cfg, t4);
        assert!(matches!(action, IncidentAction::Resolved(_)));
        assert!(mgr.active_incident().is_none());
    }
}
