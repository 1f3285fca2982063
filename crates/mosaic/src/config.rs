use std::fmt;
use std::path::Path;

use paint_scheduler::DEFAULT_WORKER_THREAD_NAME;
use serde::{Deserialize, Serialize};
use texture_upload::{TransferQueueConfig, UploadCapabilities};
use tiles::{TexturePoolConfig, TexturePoolError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    pub pool: TexturePoolConfig,
    pub transfer: TransferQueueConfig,
    pub upload: UploadCapabilities,
    pub worker_thread_name: String,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            pool: TexturePoolConfig::default(),
            transfer: TransferQueueConfig::default(),
            upload: UploadCapabilities::default(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_owned(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Pool(TexturePoolError),
    ZeroTransferSlots,
    EmptyWorkerName,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(error) => write!(formatter, "failed to read mosaic config: {error}"),
            ConfigError::Parse(error) => write!(formatter, "invalid mosaic config: {error}"),
            ConfigError::Pool(error) => write!(formatter, "invalid pool config: {error}"),
            ConfigError::ZeroTransferSlots => {
                write!(formatter, "transfer queue needs at least one slot")
            }
            ConfigError::EmptyWorkerName => write!(formatter, "worker thread name is empty"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(error) => Some(error),
            ConfigError::Parse(error) => Some(error),
            ConfigError::Pool(error) => Some(error),
            ConfigError::ZeroTransferSlots | ConfigError::EmptyWorkerName => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::Parse(error)
    }
}

impl From<TexturePoolError> for ConfigError {
    fn from(error: TexturePoolError) -> Self {
        ConfigError::Pool(error)
    }
}

impl MosaicConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MosaicConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        if self.transfer.slot_count == 0 {
            return Err(ConfigError::ZeroTransferSlots);
        }
        if self.worker_thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerName);
        }
        Ok(())
    }
}
