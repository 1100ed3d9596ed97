/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Minimal `key = value` configuration store, queried the way the rest
//! of the workspace expects: `config.property::<T>("some.key")`. Parse
//! errors never abort startup; they accumulate as build errors a
//! caller can inspect and log once parsing finishes.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use ahash::AHashMap;

#[derive(Debug, Default)]
pub struct Config {
    values: AHashMap<String, String>,
    pub build_errors: Vec<String>,
}

impl Config {
    /// Parses `key = value` lines; blank lines and lines starting with
    /// `#` are ignored.
    pub fn parse(text: &str) -> Self {
        let mut values = AHashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Config {
            values,
            build_errors: Vec::new(),
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn property<T: FromStr>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|v| v.parse().ok())
    }

    pub fn new_build_error(&mut self, key: &str, details: impl fmt::Display) {
        self.build_errors.push(format!("{key}: {details}"));
    }
}

/// The station's resolved runtime settings, with the defaults the
/// connection-handling core assumes when a key is absent.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub state_root: PathBuf,
    pub websocket_bind: String,
    pub mars_bind: String,
    pub ndjson_bind: String,
    pub idle_timeout: Duration,
    pub replay_window: Duration,
    pub receptionist_poll: Duration,
}

impl StationConfig {
    pub fn parse(config: &mut Config) -> Self {
        StationConfig {
            state_root: config
                .value("station.state-root")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/dim-station")),
            websocket_bind: config
                .value("station.bind.websocket")
                .unwrap_or("0.0.0.0:8080")
                .to_string(),
            mars_bind: config
                .value("station.bind.mars")
                .unwrap_or("0.0.0.0:8081")
                .to_string(),
            ndjson_bind: config
                .value("station.bind.ndjson")
                .unwrap_or("0.0.0.0:8082")
                .to_string(),
            idle_timeout: Duration::from_secs(
                config.property("station.idle-timeout-secs").unwrap_or(600),
            ),
            replay_window: Duration::from_secs(
                config.property("station.replay-window-secs").unwrap_or(600),
            ),
            receptionist_poll: Duration::from_secs(
                config.property("station.receptionist-poll-secs").unwrap_or(1),
            ),
        }
    }
}

#[cfg(feature = "test_mode")]
impl Default for StationConfig {
    fn default() -> Self {
        StationConfig::parse(&mut Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let config = Config::parse("station.idle-timeout-secs = 42\n# comment\n");
        assert_eq!(config.property::<u64>("station.idle-timeout-secs"), Some(42));
        assert_eq!(config.value("missing"), None);
    }

    #[test]
    fn station_config_falls_back_to_defaults() {
        let mut config = Config::default();
        let station = StationConfig::parse(&mut config);
        assert_eq!(station.idle_timeout, Duration::from_secs(600));
        assert_eq!(station.replay_window, Duration::from_secs(600));
    }
}
