// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration system for heapscope
//!
//! Manages the tunables of snapshot search, the breakpoint-driven heap search (BDHS),
//! object inspection and debugger blackboxing. The file is TOML and every section
//! falls back to its defaults when omitted.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::env::HEAPSCOPE_CONFIG;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot search settings
    pub search: SearchConfig,
    /// BDHS run settings
    pub bdhs: BdhsConfig,
    /// Object inspection settings
    pub inspect: InspectConfig,
    /// Debugger wrapper settings
    pub debugger: DebuggerConfig,
}

/// Snapshot search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of results of an interactive search
    pub max_results: usize,
    /// Maximum number of results of the per-step search during BDHS
    pub bdhs_max_results: usize,
    /// Default similarity threshold in `[0, 1]`
    pub similarity_threshold: f64,
    /// Default simhash weight in `[0, 1]`
    pub similarity_alpha: f64,
}

/// BDHS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BdhsConfig {
    /// Steps kept before the first match in the assembled result
    pub tolerance_before: usize,
    /// Steps a match may persist before the run is declared found
    pub tolerance_after: usize,
    /// Pause budget of a single run
    pub max_steps: usize,
    /// Period of the idle tick in milliseconds
    pub tick_interval_ms: u64,
    /// Number of consecutive idle ticks that ends a run
    pub idle_tick_limit: usize,
}

/// Object inspection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Maximum materialization depth
    pub max_depth: usize,
}

/// Debugger wrapper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Case-insensitive URL substrings whose scripts get blackboxed
    pub vendor_patterns: Vec<String>,
}

/// Library names blackboxed out of the box.
pub const DEFAULT_VENDOR_PATTERNS: &[&str] = &[
    "react",
    "react-dom",
    "redux",
    "vue",
    "angular",
    "jquery",
    "moment",
    "lodash",
    "immer",
    "rxjs",
    "core-js",
    "regenerator-runtime",
    "polyfill",
    "babel",
    "webpack",
    "vite",
    "rollup",
    "parcel",
    "zone.js",
];

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 200,
            bdhs_max_results: 10,
            similarity_threshold: 0.7,
            similarity_alpha: 0.5,
        }
    }
}

impl Default for BdhsConfig {
    fn default() -> Self {
        Self {
            tolerance_before: 6,
            tolerance_after: 15,
            max_steps: 5000,
            tick_interval_ms: 500,
            idle_tick_limit: 4,
        }
    }
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self { max_depth: 15 }
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self { vendor_patterns: DEFAULT_VENDOR_PATTERNS.iter().map(|p| p.to_string()).collect() }
    }
}

impl Config {
    /// Get the config file path (`$HEAPSCOPE_CONFIG`, or `~/.heapscope.toml`)
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(HEAPSCOPE_CONFIG) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let home =
            dirs::home_dir().ok_or_else(|| eyre::eyre!("Unable to determine home directory"))?;
        Ok(home.join(".heapscope.toml"))
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file, creating default if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found, creating default at {:?}", config_path);
            let default_config = Self::default();
            default_config.save_to(config_path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;
        config.validate()?;

        debug!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {parent:?}")
                })?;
            }
        }

        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {config_path:?}"))?;

        debug!("Saved configuration to {:?}", config_path);
        Ok(())
    }

    /// Check value ranges that TOML typing cannot express
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.search.similarity_threshold) {
            eyre::bail!(
                "search.similarity_threshold must be within [0, 1], got {}",
                self.search.similarity_threshold
            );
        }
        if !unit.contains(&self.search.similarity_alpha) {
            eyre::bail!(
                "search.similarity_alpha must be within [0, 1], got {}",
                self.search.similarity_alpha
            );
        }
        if self.bdhs.tick_interval_ms == 0 {
            eyre::bail!("bdhs.tick_interval_ms must be positive");
        }
        if self.bdhs.idle_tick_limit == 0 {
            eyre::bail!("bdhs.idle_tick_limit must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.search.max_results, 200);
        assert_eq!(config.search.bdhs_max_results, 10);
        assert_eq!(config.bdhs.tolerance_before, 6);
        assert_eq!(config.bdhs.tolerance_after, 15);
        assert_eq!(config.bdhs.max_steps, 5000);
        assert_eq!(config.bdhs.tick_interval_ms, 500);
        assert_eq!(config.bdhs.idle_tick_limit, 4);
        assert_eq!(config.inspect.max_depth, 15);
        assert_eq!(config.debugger.vendor_patterns.len(), 19);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [bdhs]
            tolerance_after = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.bdhs.tolerance_after, 2);
        assert_eq!(config.bdhs.tolerance_before, 6);
        assert_eq!(config.search, SearchConfig::default());
    }

    #[test]
    fn test_load_from_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("heapscope.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_rejects_out_of_range_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapscope.toml");
        fs::write(&path, "[search]\nsimilarity_threshold = 1.5\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    #[serial]
    fn test_config_path_honours_env() {
        std::env::set_var(HEAPSCOPE_CONFIG, "/tmp/custom-heapscope.toml");
        let path = Config::config_path().unwrap();
        std::env::remove_var(HEAPSCOPE_CONFIG);

        assert_eq!(path, PathBuf::from("/tmp/custom-heapscope.toml"));
    }
}
