use std::sync::{Arc, Weak};

use render_protocol::{DirtyRegion, IntRect, PaintTarget, TextureId, TileId};

use crate::texture::{CommitOutcome, ImageDims, TextureTileInfo, TileTexture};
use crate::tile::Tile;

/// Everything the worker needs to paint one tile and upload the result.
#[derive(Debug)]
pub struct PaintJob {
    pub ticket: WriteTicket,
    pub target: PaintTarget,
}

/// Exclusive right to write into a busy texture. Consuming it with
/// [`WriteTicket::commit`] or [`WriteTicket::abandon`] clears the busy flag;
/// dropping it abandons the write.
#[derive(Debug)]
pub struct WriteTicket {
    texture: Arc<TileTexture>,
    tile: Weak<Tile>,
    info: TextureTileInfo,
    region: IntRect,
    restore: DirtyRegion,
    restore_full: bool,
    finished: bool,
}

impl WriteTicket {
    pub(crate) fn new(
        texture: Arc<TileTexture>,
        tile: Weak<Tile>,
        info: TextureTileInfo,
        region: IntRect,
        restore: DirtyRegion,
        restore_full: bool,
    ) -> Self {
        Self {
            texture,
            tile,
            info,
            region,
            restore,
            restore_full,
            finished: false,
        }
    }

    pub fn texture(&self) -> &Arc<TileTexture> {
        &self.texture
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture.id()
    }

    pub fn tile_id(&self) -> TileId {
        self.info.tile
    }

    pub fn info(&self) -> TextureTileInfo {
        self.info
    }

    pub fn region(&self) -> IntRect {
        self.region
    }

    pub fn is_full(&self) -> bool {
        self.region == IntRect::from_size(self.texture.width(), self.texture.height())
    }

    /// The tile died, lost the texture, or moved since the paint started.
    pub fn is_obsolete(&self) -> bool {
        if self.texture.is_obsolete_for(self.info.tile) {
            return true;
        }
        match self.tile.upgrade() {
            Some(tile) => !tile.matches_placement(&self.info),
            None => true,
        }
    }

    /// Records the uploaded image and publishes the content.
    pub fn commit(mut self, image: ImageDims) -> CommitOutcome {
        self.finished = true;
        let outcome = self.texture.finish_write(self.info, image);
        if outcome == CommitOutcome::Shown {
            if let Some(tile) = self.tile.upgrade() {
                tile.complete_write(&self.texture, self.info.generation);
            }
        }
        outcome
    }

    pub fn abandon(mut self) {
        self.abandon_in_place();
    }

    /// Abandons the write and asks for a full repaint, for when the texture
    /// content can no longer be trusted.
    pub fn abandon_full(mut self) {
        self.restore_full = true;
        self.abandon_in_place();
    }

    fn abandon_in_place(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.texture.abandon_write();
        if let Some(tile) = self.tile.upgrade() {
            tile.restore_dirty(&self.restore, self.restore_full);
        }
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        self.abandon_in_place();
    }
}
