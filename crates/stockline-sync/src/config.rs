//! Sync engine configuration.
//!
//! Configuration is a TOML file with environment-variable overrides, mirroring
//! how the rest of the app configures itself:
//!
//! ```toml
//! [device]
//! id = "7f5c0a2e-..."
//! name = "Warehouse tablet"
//!
//! [backend]
//! kind = "rest"                          # "rest" | "table"
//! api_base_url = "https://api.stockline.app"
//! api_key = "sk_live_..."
//!
//! [sync]
//! sync_interval_secs = 300               # 0 disables the scheduler
//! batch_size = 100
//! max_retries = 10
//! initial_backoff_secs = 30
//! request_timeout_secs = 30
//! conflict_policy = "manual"             # "local_wins" | "remote_wins" | "manual"
//! retention_days = 30
//! ```
//!
//! Environment overrides (highest precedence):
//! - `STOCKLINE_DEVICE_ID`
//! - `STOCKLINE_API_URL`
//! - `STOCKLINE_API_KEY`
//! - `STOCKLINE_BACKEND_KIND`
//! - `STOCKLINE_SYNC_INTERVAL_SECS`
//! - `STOCKLINE_CONFLICT_POLICY`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{EngineResult, SyncError};

// =============================================================================
// Enums
// =============================================================================

/// Which remote backend implementation the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Dedicated sync API speaking the upload/download envelope protocol.
    #[default]
    Rest,
    /// Managed table store exposing per-entity REST tables (PostgREST style).
    Table,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Rest => write!(f, "rest"),
            BackendKind::Table => write!(f, "table"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rest" => Ok(BackendKind::Rest),
            "table" => Ok(BackendKind::Table),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown backend kind '{other}'"
            ))),
        }
    }
}

/// How download conflicts are resolved.
///
/// `Manual` surfaces conflicts through `SyncEngine::pending_conflicts` and
/// waits for an explicit `resolve_conflict` call. The other two policies
/// resolve automatically during the download phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    LocalWins,
    RemoteWins,
    #[default]
    Manual,
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_wins" => Ok(ConflictPolicy::LocalWins),
            "remote_wins" => Ok(ConflictPolicy::RemoteWins),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown conflict policy '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable identifier sent with every backend request.
    pub id: String,
    /// Human-readable label, shown in the remote device list.
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Stockline Device".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Rest,
            api_base_url: "http://localhost:8080".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Seconds between scheduled sync cycles. `0` disables the scheduler;
    /// syncs then only happen on demand or when an operation is queued.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Maximum queue records drained per upload phase.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts before a record is skipped and left for manual inspection.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Base delay for the exponential backoff between record attempts.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// How long synced queue records are retained before cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> i64 {
    10
}

fn default_initial_backoff() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
            request_timeout_secs: default_request_timeout(),
            conflict_policy: ConflictPolicy::default(),
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Root config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist. Environment overrides apply either way.
    pub fn load() -> EngineResult<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            debug!(path = %path.display(), "config file missing, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        Ok(())
    }

    pub fn default_path() -> EngineResult<PathBuf> {
        let dirs = ProjectDirs::from("app", "stockline", "stockline").ok_or_else(|| {
            SyncError::ConfigLoadFailed("could not determine config directory".to_string())
        })?;
        Ok(dirs.config_dir().join("sync.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STOCKLINE_DEVICE_ID") {
            self.device.id = id;
        }
        if let Ok(api_url) = std::env::var("STOCKLINE_API_URL") {
            self.backend.api_base_url = api_url;
        }
        if let Ok(key) = std::env::var("STOCKLINE_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Ok(kind) = std::env::var("STOCKLINE_BACKEND_KIND") {
            match kind.parse() {
                Ok(kind) => self.backend.kind = kind,
                Err(_) => warn!(%kind, "ignoring invalid STOCKLINE_BACKEND_KIND"),
            }
        }
        if let Ok(interval) = std::env::var("STOCKLINE_SYNC_INTERVAL_SECS") {
            match interval.parse() {
                Ok(secs) => self.sync.sync_interval_secs = secs,
                Err(_) => warn!(%interval, "ignoring invalid STOCKLINE_SYNC_INTERVAL_SECS"),
            }
        }
        if let Ok(policy) = std::env::var("STOCKLINE_CONFLICT_POLICY") {
            match policy.parse() {
                Ok(policy) => self.sync.conflict_policy = policy,
                Err(_) => warn!(%policy, "ignoring invalid STOCKLINE_CONFLICT_POLICY"),
            }
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "device.id must not be empty".to_string(),
            ));
        }

        let url = Url::parse(&self.backend.api_base_url).map_err(|e| {
            SyncError::InvalidConfig(format!(
                "backend.api_base_url '{}' is not a valid URL: {e}",
                self.backend.api_base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidConfig(format!(
                "backend.api_base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync.max_retries < 1 {
            return Err(SyncError::InvalidConfig(
                "sync.max_retries must be at least 1".to_string(),
            ));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL with any trailing slash removed, so endpoint paths can be
    /// appended uniformly.
    pub fn base_url(&self) -> String {
        self.backend.api_base_url.trim_end_matches('/').to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
