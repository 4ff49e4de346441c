//! Layered configuration (SPEC_FULL.md 1.1): a TOML file under
//! `.conductor/conductor.toml`, merged with `CONDUCTOR_*` environment
//! variables, merged with CLI flags — in that precedence order, file
//! weakest, flags strongest. Every field is `#[serde(default)]` so a
//! partial or missing file is legal; a missing file falls back entirely to
//! built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::mode_config::Mode;
use crate::errors::ConfigError;

/// `[defaults]`: process-wide defaults not specific to any one mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub mode: Mode,
    pub worker_pool_size: usize,
    pub snapshot_interval: u64,
    pub cost_limit: Option<Decimal>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            mode: Mode::Speed,
            worker_pool_size: 4,
            snapshot_interval: 100,
            cost_limit: None,
        }
    }
}

/// `[modes.<name>]`: a partial override layered onto one mode's baseline
/// config. Mirrors `ModeConfigPatch` field-for-field so it can be applied
/// through the same merge path the mode manager already exposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOverride {
    pub human_approval: Option<bool>,
    pub use_local_models: Option<bool>,
    pub max_retries: Option<u32>,
    pub cost_limit: Option<Decimal>,
    pub task_timeout_secs: Option<u64>,
}

impl From<ModeOverride> for crate::mode::ModeConfigPatch {
    fn from(o: ModeOverride) -> Self {
        crate::mode::ModeConfigPatch {
            human_approval: o.human_approval,
            use_local_models: o.use_local_models,
            max_retries: o.max_retries,
            cost_limit: o.cost_limit.map(Some),
            task_timeout_secs: o.task_timeout_secs,
        }
    }
}

/// `[provider]`: default model descriptors for the AI provider abstraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
}

/// `[store]`: event-store backend selection. This crate ships only
/// `InMemoryEventStore`, so `backend` is always `"memory"` here (SPEC_FULL.md
/// 1), but the field is kept so an out-of-tree backend has somewhere to
/// read its name from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: String,
    pub snapshot_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            snapshot_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub modes: HashMap<String, ModeOverride>,
    pub provider: ProviderConfig,
    pub store: StoreConfig,
    pub output_format: String,
    pub project_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            modes: HashMap::new(),
            provider: ProviderConfig::default(),
            store: StoreConfig::default(),
            output_format: "table".to_string(),
            project_path: None,
        }
    }
}

impl Config {
    /// `<project_dir>/.conductor/conductor.toml`.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(".conductor").join("conductor.toml")
    }

    /// `~/.config/conductor/conductor.toml`, the fallback layer used when a
    /// project has no `.conductor` directory of its own.
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("conductor").join("conductor.toml"))
    }

    /// Load from `path`, falling back to built-in defaults if it doesn't
    /// exist. A present-but-unparseable file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let raw = toml::to_string_pretty(self).expect("Config always serializes");
        std::fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `CONDUCTOR_*` environment variables onto a file-loaded
    /// config. Env beats file; CLI flags (applied by the caller afterward)
    /// beat both.
    pub fn merge_env(mut self) -> Self {
        if let Ok(mode) = std::env::var("CONDUCTOR_DEFAULT_MODE") {
            if let Ok(mode) = mode.parse::<Mode>() {
                self.defaults.mode = mode;
            }
        }
        if let Ok(url) = std::env::var("CONDUCTOR_API_URL") {
            self.provider.api_url = Some(url);
        }
        if let Ok(key) = std::env::var("CONDUCTOR_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(format) = std::env::var("CONDUCTOR_OUTPUT_FORMAT") {
            self.output_format = format;
        }
        if let Ok(path) = std::env::var("CONDUCTOR_PROJECT_PATH") {
            self.project_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Load layered config (file -> env) for `project_dir`; CLI flags are
    /// then overlaid by the caller on top of the returned value.
    ///
    /// The file layer itself falls back from the project-local
    /// `.conductor/conductor.toml` to a user-level `~/.config/conductor/
    /// conductor.toml` when the project has no config of its own, before
    /// finally giving up and using built-in defaults.
    pub fn load_layered(project_dir: &Path) -> Result<Self, ConfigError> {
        let project_path = Self::path_for(project_dir);
        let base = if project_path.exists() {
            Self::load(&project_path)?
        } else if let Some(user_path) = Self::user_path().filter(|p| p.exists()) {
            tracing::info!(path = %user_path.display(), "falling back to user-level config");
            Self::load(&user_path)?
        } else {
            Self::default()
        };
        Ok(base.merge_env())
    }

    /// `config get <dotted.path>`: a read accessor over the subset of
    /// fields the CLI exposes, rendered as a display string.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "defaults.mode" => Some(self.defaults.mode.to_string()),
            "defaults.worker_pool_size" => Some(self.defaults.worker_pool_size.to_string()),
            "defaults.snapshot_interval" => Some(self.defaults.snapshot_interval.to_string()),
            "defaults.cost_limit" => self.defaults.cost_limit.map(|d| d.to_string()),
            "provider.api_url" => self.provider.api_url.clone(),
            "provider.default_model" => self.provider.default_model.clone(),
            "store.backend" => Some(self.store.backend.clone()),
            "output_format" => Some(self.output_format.clone()),
            _ => None,
        }
    }

    /// `config set <dotted.path> <value>`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "defaults.mode" => {
                self.defaults.mode = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("unknown mode {value:?}")))?;
            }
            "defaults.worker_pool_size" => {
                self.defaults.worker_pool_size = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("worker_pool_size must be an integer".into()))?;
            }
            "defaults.snapshot_interval" => {
                self.defaults.snapshot_interval = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("snapshot_interval must be an integer".into()))?;
            }
            "provider.api_url" => self.provider.api_url = Some(value.to_string()),
            "provider.api_key" => self.provider.api_key = Some(value.to_string()),
            "provider.default_model" => self.provider.default_model = Some(value.to_string()),
            "output_format" => self.output_format = value.to_string(),
            other => {
                return Err(ConfigError::InvalidValue(format!("unknown config key {other:?}")));
            }
        }
        Ok(())
    }
}
