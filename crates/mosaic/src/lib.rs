use std::fmt;

use paint_scheduler::SchedulerError;
use texture_upload::UploadError;
use tiles::TexturePoolError;

mod config;
mod context;
mod filters;
mod operation;
mod priority;

pub use config::{ConfigError, MosaicConfig};
pub use context::{MosaicStats, TileContext};
pub use filters::CancelFilter;
pub use operation::PaintTileOperation;
pub use priority::{DEAD_TILE_PRIORITY, PriorityInputs, TileRole, ViewState, paint_priority};

#[derive(Debug)]
pub enum MosaicError {
    Config(ConfigError),
    Pool(TexturePoolError),
    Upload(UploadError),
    Scheduler(SchedulerError),
}

impl fmt::Display for MosaicError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MosaicError::Config(error) => write!(formatter, "{error}"),
            MosaicError::Pool(error) => write!(formatter, "texture pool: {error}"),
            MosaicError::Upload(error) => write!(formatter, "texture upload: {error}"),
            MosaicError::Scheduler(error) => write!(formatter, "paint scheduler: {error}"),
        }
    }
}

impl std::error::Error for MosaicError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MosaicError::Config(error) => Some(error),
            MosaicError::Pool(error) => Some(error),
            MosaicError::Upload(error) => Some(error),
            MosaicError::Scheduler(error) => Some(error),
        }
    }
}

impl From<ConfigError> for MosaicError {
    fn from(error: ConfigError) -> Self {
        MosaicError::Config(error)
    }
}

impl From<TexturePoolError> for MosaicError {
    fn from(error: TexturePoolError) -> Self {
        MosaicError::Pool(error)
    }
}

impl From<UploadError> for MosaicError {
    fn from(error: UploadError) -> Self {
        MosaicError::Upload(error)
    }
}

impl From<SchedulerError> for MosaicError {
    fn from(error: SchedulerError) -> Self {
        MosaicError::Scheduler(error)
    }
}

static_assertions::assert_impl_all!(TileContext: Send, Sync);
static_assertions::assert_impl_all!(PaintTileOperation: Send, Sync);

#[cfg(test)]
mod tests;
