use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::CampaignError;
use super::retry::RetryPolicy;
use crate::engine::classifier::DEFAULT_LIBRARY_MARKERS;

/// Project-level config file looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = "cadprefix.toml";

/// Environment variable prefix, e.g. `CADPREFIX__SETTLE_MS=0`
pub const ENV_PREFIX: &str = "CADPREFIX";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry schedule for transient host faults
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Retry schedule while waiting for a locked file to be released
    #[serde(default = "default_lock_retry")]
    pub lock_retry: RetryPolicy,

    /// Wait after closing every document, before any file is moved
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Whether renamed files are moved or copied
    #[serde(default)]
    pub transfer: TransferMode,

    /// Rewrite the part number of renamed documents to carry the new prefix
    #[serde(default)]
    pub update_part_numbers: bool,

    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Case-insensitive path markers of content-center / vendor library documents
    #[serde(default = "default_library_markers")]
    pub library_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Order in which root assemblies are walked
    #[serde(default)]
    pub root_order: RootOrder,

    /// Also evaluate and repair drawings found under the root directory
    #[serde(default = "default_true")]
    pub include_drawings: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootOrder {
    #[default]
    Alphabetical,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Rename in place; the old path disappears
    #[default]
    Move,
    /// Copy to the new name; the original is reported for deletion by the caller
    Copy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub kind: HostKind,

    /// Executable of the authoring-host bridge (bridge hosts only)
    #[serde(default)]
    pub bridge_command: Option<String>,

    #[serde(default)]
    pub bridge_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// Documents stored as JSON files, driven in-process
    #[default]
    JsonStore,
    /// External authoring host reached through a JSON-RPC bridge process
    Bridge,
}

fn default_lock_retry() -> RetryPolicy {
    RetryPolicy::new(3, vec![1000, 2000, 4000])
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_library_markers() -> Vec<String> {
    DEFAULT_LIBRARY_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            library_markers: default_library_markers(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root_order: RootOrder::default(),
            include_drawings: default_true(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            kind: HostKind::default(),
            bridge_command: None,
            bridge_args: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_retry: default_lock_retry(),
            settle_ms: default_settle_ms(),
            classifier: ClassifierConfig::default(),
            discovery: DiscoveryConfig::default(),
            transfer: TransferMode::default(),
            update_part_numbers: false,
            host: HostConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, later sources overriding earlier ones:
    ///
    /// 1. Built-in defaults
    /// 2. User config (`<config dir>/cadprefix/config.toml`)
    /// 3. `./cadprefix.toml`
    /// 4. `explicit`, when given (must exist)
    /// 5. `CADPREFIX__*` environment variables
    pub fn load(explicit: Option<&Path>) -> Result<Self, CampaignError> {
        let defaults = serde_json::to_string(&EngineConfig::default())
            .map_err(|e| CampaignError::Config(e.to_string()))?;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(&defaults, config::FileFormat::Json));

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                tracing::info!("Loading user config from: {}", user_path.display());
            }
            builder = builder.add_source(config::File::from(user_path).required(false));
        }

        builder = builder
            .add_source(config::File::from(PathBuf::from(PROJECT_CONFIG_FILE)).required(false));

        if let Some(path) = explicit {
            tracing::info!("Loading config from: {}", path.display());
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("classifier.library_markers")
                .with_list_parse_key("host.bridge_args"),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<EngineConfig>())
            .map_err(|e| CampaignError::Config(e.to_string()))
    }

    /// `<config dir>/cadprefix/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cadprefix")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Configuration without any waits, for fixtures and tests
    pub fn without_delays() -> Self {
        Self {
            retry: RetryPolicy::immediate(3),
            lock_retry: RetryPolicy::immediate(3),
            settle_ms: 0,
            ..Self::default()
        }
    }
}
