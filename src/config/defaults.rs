use super::Config;

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_s: 10,
            probe_timeout_s: 5,
            window_short_s: 120,
            window_long_s: 3600,
            ttfb_yellow_ms: 500,
            ratio_yellow: 0.9,
            red_consecutive_errors: 3,
            red_err_rate: 0.5,
            yellow_persistence_s: 60,
            resolve_hold_s: 30,
            thumbnail_every_k: 3,
            history_retention: 50,
            timeline_cap: 500,
            thumbnail_max_age_h: 24,
            grace_timeout_s: 10,
        }
    }
}
