//! Configuration management for simt-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (SIMT_EMU_MAX_CYCLES, etc.)
//! 2. Project-local config file (`./simt-emu.toml`)
//! 3. User config file (`~/.config/simt-emu/config.toml`)
//! 4. Built-in defaults
//!
//! Only simulator-side knobs live here. Hardware build parameters belong
//! to [`crate::device::DeviceParams`]; they are fixed per build, not per
//! environment.
//!
//! # Config File Format
//!
//! ```toml
//! # simt-emu.toml
//!
//! # Threads to launch when the CLI is not told otherwise
//! default_thread_count = 8
//!
//! # Cycle budget before a run is declared stuck
//! max_cycles = 100000
//!
//! # Memory response latency in cycles
//! memory_latency = 1
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// simt-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Thread count used when the CLI gets no `--threads`.
    pub default_thread_count: Option<u8>,

    /// Cycle budget for run-to-done.
    pub max_cycles: Option<u64>,

    /// Memory response latency in cycles, for both memories.
    pub memory_latency: Option<u32>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `simt-emu.toml`
    /// 3. User config `~/.config/simt-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Get the default thread count, with fallback.
    pub fn default_thread_count(&self) -> u8 {
        self.default_thread_count.unwrap_or(8)
    }

    /// Get the cycle budget, with fallback.
    pub fn max_cycles(&self) -> u64 {
        self.max_cycles.unwrap_or(100_000)
    }

    /// Get the memory latency, with fallback.
    pub fn memory_latency(&self) -> u32 {
        self.memory_latency.unwrap_or(1)
    }

    /// Load user configuration from ~/.config/simt-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("simt-emu").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./simt-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("simt-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("simt-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.default_thread_count.is_some() {
            self.default_thread_count = other.default_thread_count;
        }
        if other.max_cycles.is_some() {
            self.max_cycles = other.max_cycles;
        }
        if other.memory_latency.is_some() {
            self.memory_latency = other.memory_latency;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SIMT_EMU_THREADS") {
            match value.parse() {
                Ok(n) => self.default_thread_count = Some(n),
                Err(_) => log::warn!("Ignoring bad SIMT_EMU_THREADS: {}", value),
            }
        }
        if let Ok(value) = std::env::var("SIMT_EMU_MAX_CYCLES") {
            match value.parse() {
                Ok(n) => self.max_cycles = Some(n),
                Err(_) => log::warn!("Ignoring bad SIMT_EMU_MAX_CYCLES: {}", value),
            }
        }
        if let Ok(value) = std::env::var("SIMT_EMU_MEM_LATENCY") {
            match value.parse() {
                Ok(n) => self.memory_latency = Some(n),
                Err(_) => log::warn!("Ignoring bad SIMT_EMU_MEM_LATENCY: {}", value),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("simt-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# simt-emu configuration
# Place this file at ~/.config/simt-emu/config.toml or ./simt-emu.toml

# Threads to launch when the CLI is not told otherwise
default_thread_count = 8

# Cycle budget before a run is declared stuck
# max_cycles = 100000

# Memory response latency in cycles
# memory_latency = 1
"#
        .to_string()
    }
}
