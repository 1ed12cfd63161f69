//! Runtime configuration (§6). Split into `types` (the struct) and
//! `defaults` (its `Default` impl), following the teacher crate's
//! `config/types.rs` + `config/defaults.rs` split.

mod defaults;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every tunable named in the §6 table. `serde(default)` on each field lets a
/// partial JSON/TOML document override only the knobs an operator cares
/// about, falling back to [`Default::default`] for the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_s: u64,
    pub probe_timeout_s: u64,
    pub window_short_s: u64,
    pub window_long_s: u64,
    pub ttfb_yellow_ms: u32,
    pub ratio_yellow: f64,
    pub red_consecutive_errors: usize,
    pub red_err_rate: f64,
    pub yellow_persistence_s: u64,
    pub resolve_hold_s: u64,
    pub thumbnail_every_k: u32,
    pub history_retention: usize,
    /// Not in the §6 table verbatim but implied by "timeline per incident ≤
    /// N_timeline" in §5.
    pub timeline_cap: usize,
    /// Age-based sweep threshold for the thumbnail directory (§5), in hours.
    pub thumbnail_max_age_h: u64,
    /// How long `delete_stream`/`shutdown` wait for a Supervisor to reach
    /// STOPPED before force-aborting its task (§5).
    pub grace_timeout_s: u64,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_s)
    }

    pub fn window_short(&self) -> Duration {
        Duration::from_secs(self.window_short_s)
    }

    pub fn window_long(&self) -> Duration {
        Duration::from_secs(self.window_long_s)
    }

    pub fn yellow_persistence(&self) -> Duration {
        Duration::from_secs(self.yellow_persistence_s)
    }

    pub fn resolve_hold(&self) -> Duration {
        Duration::from_secs(self.resolve_hold_s)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_s)
    }

    /// Ring capacity: the long window at the configured cadence, per §4.3 /
    /// §5 ("capacity covering 60 minutes at the maximum sampling rate").
    pub fn ring_capacity(&self) -> usize {
        let cap = self.window_long_s / self.poll_interval_s.max(1);
        // margin, and a floor so a very sparse cadence still keeps *some*
        // history around.
        (cap as usize).saturating_mul(2).max(16)
    }
}
