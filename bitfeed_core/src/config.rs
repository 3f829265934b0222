use crate::map::{DEFAULT_MAP_SIZE, MapError, MapSize};
use crate::session::IdlePolicy;
use crate::word::WordWidth;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the shared-memory object.
pub const DEFAULT_SHM_ENV_VAR: &str = "SHM_ENV_VAR";

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigWordWidth {
    #[default]
    Native,
    #[serde(rename = "32")]
    W32,
    #[serde(rename = "64")]
    W64,
}

impl From<ConfigWordWidth> for WordWidth {
    fn from(width: ConfigWordWidth) -> Self {
        match width {
            ConfigWordWidth::Native => WordWidth::Native,
            ConfigWordWidth::W32 => WordWidth::W32,
            ConfigWordWidth::W64 => WordWidth::W64,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MapSettings {
    #[serde(default = "default_map_size")]
    pub size: usize,
    #[serde(default)]
    pub word_width: ConfigWordWidth,
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

impl MapSettings {
    pub fn map_size(&self) -> Result<MapSize, MapError> {
        MapSize::new(self.size)
    }
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            size: default_map_size(),
            word_width: ConfigWordWidth::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ShmemSettings {
    #[serde(default = "default_env_var")]
    pub env_var: String,
}

fn default_env_var() -> String {
    DEFAULT_SHM_ENV_VAR.to_string()
}

impl Default for ShmemSettings {
    fn default() -> Self {
        Self {
            env_var: default_env_var(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CheckpointSettings {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

pub fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./.bitfeed/checkpoint.bin")
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_poll_interval_ms() -> u64 {
    10
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_max_polls() -> u32 {
    1000
}

impl SessionSettings {
    pub fn idle_policy(&self) -> IdlePolicy {
        IdlePolicy {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            max_polls: default_max_polls(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProgressSettings {
    pub paths_csv: Option<PathBuf>,
    pub branches_csv: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BitfeedConfig {
    #[serde(default)]
    pub map: MapSettings,
    #[serde(default)]
    pub shmem: ShmemSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub progress: ProgressSettings,
}

impl BitfeedConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let config: BitfeedConfig = toml::from_str(content)?;
        config.map.map_size()?;
        Ok(config)
    }
}
