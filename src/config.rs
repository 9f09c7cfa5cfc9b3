// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runner configuration (§4.7): timeouts, thresholds, and supervisor count,
//! loaded in layers the way `cargo nextest`'s own profile config is loaded --
//! built-in defaults, an optional TOML file, then environment overrides.

use camino::{Utf8Path, Utf8PathBuf};
use etcetera::{BaseStrategy, choose_base_strategy};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::errors::ConfigParseError;

fn default_supervisor_count() -> NonZeroUsize {
    NonZeroUsize::new(1).unwrap()
}

fn default_hang_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_stream_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_small_batch_threshold() -> usize {
    10
}

fn default_max_output_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_monitor_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_idle_poll_interval() -> Duration {
    Duration::from_millis(20)
}

/// The full set of tunables described in §4.7, deserializable from TOML and
/// overridable via `RESILIENT_RUNNER_`-prefixed environment variables (e.g.
/// `RESILIENT_RUNNER_HANG_TIMEOUT=90s`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker supervisors run concurrently.
    pub supervisor_count: NonZeroUsize,

    /// Absolute deadline (§4.3) for a test running alone in a size-1 batch
    /// before it is reported `Hanging`.
    #[serde(with = "humantime_serde")]
    pub hang_timeout: Duration,

    /// How long a supervisor waits for *any* event on a batch's stream
    /// before treating it as idle.
    #[serde(with = "humantime_serde")]
    pub stream_timeout: Duration,

    /// Batch sizes at or below this are "small": an idle stream timeout at
    /// this size is treated as suspicious rather than tolerated indefinitely.
    pub small_batch_threshold: usize,

    /// Per-test captured output cap, in bytes, before truncation.
    pub max_output_bytes: u64,

    /// How often the tier promotion monitor checks [`crate::queue::WorkQueue::can_promote`].
    #[serde(with = "humantime_serde")]
    pub monitor_poll_interval: Duration,

    /// How often a supervisor with nothing to take polls the queue again
    /// once it observes `Pending` and `Confirmed` both empty.
    #[serde(with = "humantime_serde")]
    pub idle_poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            supervisor_count: default_supervisor_count(),
            hang_timeout: default_hang_timeout(),
            stream_timeout: default_stream_timeout(),
            small_batch_threshold: default_small_batch_threshold(),
            max_output_bytes: default_max_output_bytes(),
            monitor_poll_interval: default_monitor_poll_interval(),
            idle_poll_interval: default_idle_poll_interval(),
        }
    }
}

impl RunnerConfig {
    /// Loads config from built-in defaults, optionally layering a TOML file
    /// and `RESILIENT_RUNNER_`-prefixed environment variables on top.
    ///
    /// `config_file` need not exist; a missing file is treated as "no
    /// overrides from file", not an error.
    pub fn load(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let defaults = Self::default();
        let mut builder = ::config::Config::builder().add_source(
            ::config::Config::try_from(&defaults)
                .expect("RunnerConfig defaults always serialize")
                .clone(),
        );

        if let Some(path) = config_file {
            builder = builder.add_source(
                ::config::File::from(path.as_std_path()).required(false),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("RESILIENT_RUNNER")
                .try_parsing(true)
                .separator("__"),
        );

        let built = builder
            .build()
            .map_err(|err| ConfigParseError::new(config_file.map(Utf8PathBuf::from), err))?;

        built
            .try_deserialize()
            .map_err(|err| ConfigParseError::new(config_file.map(Utf8PathBuf::from), err))
    }

    /// The platform-specific default location for a config file
    /// (`<config dir>/resilient-test-runner/config.toml`), for callers that
    /// want file-based overrides without hardcoding a path.
    ///
    /// Returns `None` if the platform's config directory cannot be
    /// determined or is not valid UTF-8; callers should fall back to
    /// `load(None)` in that case rather than treating it as fatal.
    pub fn default_config_path() -> Option<Utf8PathBuf> {
        let strategy = choose_base_strategy().ok()?;
        let path = strategy.config_dir().join("resilient-test-runner").join("config.toml");
        Utf8PathBuf::from_path_buf(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.supervisor_count.get(), 1);
        assert_eq!(config.hang_timeout, Duration::from_secs(60));
        assert_eq!(config.stream_timeout, Duration::from_secs(10));
        assert_eq!(config.small_batch_threshold, 10);
        assert_eq!(config.max_output_bytes, 4 * 1024 * 1024);
        assert_eq!(config.monitor_poll_interval, Duration::from_millis(100));
        assert_eq!(config.idle_poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let config = RunnerConfig::load(None).unwrap();
        assert_eq!(config.supervisor_count.get(), 1);
    }

    #[test]
    fn load_with_a_nonexistent_file_is_not_an_error() {
        let path = Utf8PathBuf::from("/nonexistent/does-not-exist.toml");
        let config = RunnerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.hang_timeout, Duration::from_secs(60));
    }

    #[test]
    fn default_config_path_ends_in_the_crate_name() {
        if let Some(path) = RunnerConfig::default_config_path() {
            assert!(path.ends_with("resilient-test-runner/config.toml"));
        }
    }

    #[test]
    fn load_layers_a_toml_file_over_the_defaults() {
        use indoc::indoc;
        use pretty_assertions::assert_eq;

        let dir = camino_tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            indoc! {"
                supervisor_count = 4
                hang_timeout = '30s'
                small_batch_threshold = 20
            "},
        )
        .unwrap();

        let config = RunnerConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.supervisor_count.get(), 4);
        assert_eq!(config.hang_timeout, Duration::from_secs(30));
        assert_eq!(config.small_batch_threshold, 20);
        // Untouched by the file, still the built-in default.
        assert_eq!(config.stream_timeout, Duration::from_secs(10));
    }
}
