use std::fmt;

mod config;
mod pool;
mod texture;
mod tile;
mod write;

pub use config::{DEFAULT_BUFFERING_FACTOR, DEFAULT_TILE_SIZE, TexturePoolConfig};
pub use pool::{GroupRegistry, PoolStats, TexturePool};
pub use texture::{
    CommitOutcome, ImageDims, OwnerRef, TextureBusy, TextureTileInfo, TileTexture, UNUSED_LEVEL,
};
pub use tile::{DrawBinding, Tile, TileState};
pub use write::{PaintJob, WriteTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexturePoolError {
    ZeroTileSize,
    EmptyViewport,
    ZeroBufferingFactor,
}

impl fmt::Display for TexturePoolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TexturePoolError::ZeroTileSize => write!(formatter, "tile size must be non-zero"),
            TexturePoolError::EmptyViewport => {
                write!(formatter, "viewport must span at least one tile")
            }
            TexturePoolError::ZeroBufferingFactor => {
                write!(formatter, "buffering factor must be at least 1")
            }
        }
    }
}

impl std::error::Error for TexturePoolError {}

static_assertions::assert_impl_all!(TexturePool: Send, Sync);
static_assertions::assert_impl_all!(Tile: Send, Sync);
static_assertions::assert_impl_all!(TileTexture: Send, Sync);
static_assertions::assert_impl_all!(WriteTicket: Send);
