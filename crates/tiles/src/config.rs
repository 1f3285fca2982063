use serde::{Deserialize, Serialize};

use crate::TexturePoolError;

pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const DEFAULT_BUFFERING_FACTOR: u32 = 2;

/// Pool sizing parameters. The hard cap is the on-screen tile count, widened by
/// the prefetch ring on every side and multiplied by the buffering factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TexturePoolConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub viewport_columns: u32,
    pub viewport_rows: u32,
    pub prefetch_distance: u32,
    pub buffering_factor: u32,
    pub platform_max_textures: u32,
}

impl Default for TexturePoolConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            viewport_columns: 6,
            viewport_rows: 5,
            prefetch_distance: 1,
            buffering_factor: DEFAULT_BUFFERING_FACTOR,
            platform_max_textures: 512,
        }
    }
}

impl TexturePoolConfig {
    pub fn small_viewport() -> Self {
        Self {
            viewport_columns: 3,
            viewport_rows: 3,
            prefetch_distance: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TexturePoolError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(TexturePoolError::ZeroTileSize);
        }
        if self.viewport_columns == 0 || self.viewport_rows == 0 {
            return Err(TexturePoolError::EmptyViewport);
        }
        if self.buffering_factor == 0 {
            return Err(TexturePoolError::ZeroBufferingFactor);
        }
        Ok(())
    }

    pub fn hard_cap(&self) -> u32 {
        let ring = self.prefetch_distance.saturating_mul(2);
        let columns = self.viewport_columns.saturating_add(ring);
        let rows = self.viewport_rows.saturating_add(ring);
        columns
            .saturating_mul(rows)
            .saturating_mul(self.buffering_factor)
            .min(self.platform_max_textures)
    }

    pub fn with_platform_limit(mut self, limit: Option<u32>) -> Self {
        if let Some(limit) = limit {
            self.platform_max_textures = self.platform_max_textures.min(limit);
        }
        self
    }
}
