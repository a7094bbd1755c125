//! Engine configuration and option handling.
//!
//! `EngineConfig` carries the tunables the core reads at runtime. The
//! string-keyed option layer on top exists for embedders that configure the
//! engine from external input; unknown names fail immediately with
//! fuzzy-matched suggestions rather than being silently ignored.

use crate::error::{EngineError, EngineResult};
use crate::platform::{HostPlatform, PlatformServices};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// Recognized option names.
const KNOWN_OPTIONS: &[&str] = &[
    "engine.SafepointPollInterval",
    "engine.WorkerThreads",
    "engine.ElevateWorkerPriority",
];

/// Maximum edit distance for an option-name suggestion.
const SUGGESTION_DISTANCE: usize = 4;

/// Tunables read by the engine core.
#[derive(Clone)]
pub struct EngineConfig {
    /// Interval for bounded polling in pause/safepoint waits.
    ///
    /// A latency/CPU tradeoff, not a contract; tests shorten it.
    pub safepoint_poll_interval: Duration,

    /// Number of engine-managed worker threads
    pub worker_threads: usize,

    /// Whether workers request elevated scheduling priority
    pub elevate_worker_priority: bool,

    /// Injected platform services
    pub platform: Arc<dyn PlatformServices>,
}

impl EngineConfig {
    /// Configuration with default tunables and the host platform service
    pub fn new() -> Self {
        Self {
            safepoint_poll_interval: Duration::from_millis(10),
            worker_threads: num_cpus::get(),
            elevate_worker_priority: false,
            platform: Arc::new(HostPlatform::new()),
        }
    }

    /// Set the safepoint/pause poll interval
    pub fn safepoint_poll_interval(mut self, interval: Duration) -> Self {
        self.safepoint_poll_interval = interval;
        self
    }

    /// Set the worker pool width
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Replace the platform service
    pub fn platform(mut self, platform: Arc<dyn PlatformServices>) -> Self {
        self.platform = platform;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// String-keyed option set, validated against the known descriptor list.
#[derive(Default)]
pub struct EngineOptions {
    values: FxHashMap<String, String>,
}

impl EngineOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by name.
    ///
    /// Unknown names fail synchronously with near-miss suggestions.
    pub fn set(&mut self, name: &str, value: &str) -> EngineResult<()> {
        if !KNOWN_OPTIONS.contains(&name) {
            return Err(EngineError::UnknownOption {
                name: name.to_string(),
                suggestions: suggest(name),
            });
        }
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Get a raw option value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Apply the collected options onto a configuration.
    pub fn apply(&self, mut config: EngineConfig) -> EngineResult<EngineConfig> {
        if let Some(raw) = self.get("engine.SafepointPollInterval") {
            let millis: u64 = parse_option("engine.SafepointPollInterval", raw)?;
            if millis == 0 {
                return Err(EngineError::InvalidOptionValue {
                    name: "engine.SafepointPollInterval".to_string(),
                    reason: "interval must be positive".to_string(),
                });
            }
            config.safepoint_poll_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = self.get("engine.WorkerThreads") {
            let count: usize = parse_option("engine.WorkerThreads", raw)?;
            if count == 0 {
                return Err(EngineError::InvalidOptionValue {
                    name: "engine.WorkerThreads".to_string(),
                    reason: "at least one worker is required".to_string(),
                });
            }
            config.worker_threads = count;
        }
        if let Some(raw) = self.get("engine.ElevateWorkerPriority") {
            config.elevate_worker_priority = parse_option("engine.ElevateWorkerPriority", raw)?;
        }
        Ok(config)
    }
}

fn parse_option<T: std::str::FromStr>(name: &str, raw: &str) -> EngineResult<T> {
    raw.parse().map_err(|_| EngineError::InvalidOptionValue {
        name: name.to_string(),
        reason: format!("could not parse '{raw}'"),
    })
}

/// Near-miss suggestions for an unknown option name, best match first.
fn suggest(name: &str) -> Vec<String> {
    let mut scored: Vec<(usize, &str)> = KNOWN_OPTIONS
        .iter()
        .map(|candidate| (edit_distance(name, candidate), *candidate))
        .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
        .collect();
    scored.sort_by_key(|(distance, _)| *distance);
    scored.into_iter().map(|(_, s)| s.to_string()).collect()
}

/// Levenshtein distance over bytes; option names are ASCII.
fn edit_distance(a: &str, b: &str) -> usize {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.safepoint_poll_interval, Duration::from_millis(10));
        assert!(config.worker_threads >= 1);
        assert!(!config.elevate_worker_priority);
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig::new()
            .safepoint_poll_interval(Duration::from_millis(1))
            .worker_threads(2);
        assert_eq!(config.safepoint_poll_interval, Duration::from_millis(1));
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_unknown_option_suggests_near_miss() {
        let mut options = EngineOptions::new();
        let err = options
            .set("engine.SafepointPolInterval", "5")
            .unwrap_err();
        match err {
            EngineError::UnknownOption { suggestions, .. } => {
                assert_eq!(suggestions[0], "engine.SafepointPollInterval");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_option_far_name_no_suggestions() {
        let mut options = EngineOptions::new();
        let err = options.set("completely.unrelated", "5").unwrap_err();
        match err {
            EngineError::UnknownOption { suggestions, .. } => {
                assert!(suggestions.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_apply_options() {
        let mut options = EngineOptions::new();
        options.set("engine.SafepointPollInterval", "3").unwrap();
        options.set("engine.WorkerThreads", "2").unwrap();

        let config = options.apply(EngineConfig::new()).unwrap();
        assert_eq!(config.safepoint_poll_interval, Duration::from_millis(3));
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_invalid_option_value() {
        let mut options = EngineOptions::new();
        options.set("engine.WorkerThreads", "zero").unwrap();
        assert!(matches!(
            options.apply(EngineConfig::new()),
            Err(EngineError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("abc", "abd"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
    }
}
