use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Engine tunables. [`EngineConfig::load`] reads the environment with
/// logged defaults; [`Default`] skips the environment entirely.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period after the last refresh trigger before the fetch fires.
    pub debounce: Duration,
    /// Result bound for the full rail fetch.
    pub rail_limit: u32,
    /// Result bound for the cheap existence probe.
    pub probe_limit: u32,
    /// Fraction of a card's area that must be on screen to count as seen.
    pub visibility_threshold: f32,
}

impl EngineConfig {
    pub fn load() -> Self {
        Self {
            debounce: Duration::from_millis(try_load("RECO_DEBOUNCE_MS", "1500")),
            rail_limit: try_load("RECO_RAIL_LIMIT", "20"),
            probe_limit: try_load("RECO_PROBE_LIMIT", "1"),
            visibility_threshold: try_load("RECO_VISIBILITY_THRESHOLD", "0.25"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1500),
            rail_limit: 20,
            probe_limit: 1,
            visibility_threshold: 0.25,
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
