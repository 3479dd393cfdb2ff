// Engine configuration.
//
// Global config: `~/.pagepatch/config.toml`
// Patch store:   `~/.pagepatch/store.db`

use std::path::{Path, PathBuf};
use std::time::Duration;

use pagepatch_common::types::ScopeGranularity;
use serde::{Deserialize, Serialize};

/// Root directory for pagepatch state: `~/.pagepatch/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".pagepatch"))
}

/// Path to the config file: `~/.pagepatch/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the default SQLite patch store: `~/.pagepatch/store.db`.
pub fn store_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("store.db"))
}

// ── EngineConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub traversal: TraversalConfig,
    pub locator: LocatorConfig,
    pub reconcile: ReconcileConfig,
    pub persist: PersistConfig,
    pub boot: BootConfig,
    pub undo: UndoConfig,
    pub scope: ScopeConfig,
}

impl EngineConfig {
    /// Load from `~/.pagepatch/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path. Out-of-range values are clamped.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        Ok(config.clamped())
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Copy with every numeric setting pulled into its supported range.
    pub fn clamped(mut self) -> Self {
        self.traversal.max_shadow_depth = self.traversal.max_shadow_depth.clamp(1, 64);
        self.locator.max_climb_depth = self.locator.max_climb_depth.clamp(1, 32);
        self.reconcile.interval_ms = self.reconcile.interval_ms.clamp(16, 5_000);
        self.persist.debounce_ms = self.persist.debounce_ms.min(10_000);
        self.boot.retry_count = self.boot.retry_count.min(20);
        self.boot.retry_interval_ms = self.boot.retry_interval_ms.clamp(10, 5_000);
        self.undo.capacity = self.undo.capacity.clamp(1, 200);
        self
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile.interval_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist.debounce_ms)
    }

    pub fn boot_retry_interval(&self) -> Duration {
        Duration::from_millis(self.boot.retry_interval_ms)
    }
}

/// Shadow-root traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraversalConfig {
    /// Nesting depth at which shadow-piercing queries stop descending.
    pub max_shadow_depth: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self { max_shadow_depth: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    /// Ancestors climbed when building a structural path.
    pub max_climb_depth: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self { max_climb_depth: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum spacing between reconciliation passes.
    pub interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistConfig {
    /// Quiet window before a scheduled save runs.
    pub debounce_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

/// Timed re-applies right after activation, for late-rendering content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootConfig {
    pub retry_count: u32,
    pub retry_interval_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self { retry_count: 5, retry_interval_ms: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UndoConfig {
    pub capacity: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self { capacity: 20 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Granularity used when none is given explicitly.
    pub granularity: ScopeGranularity,
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
