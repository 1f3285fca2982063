use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, warn};
use paint_scheduler::QueuedOperation;
use render_protocol::{GroupId, TileId, TilePainter};
use texture_upload::{UploadError, UploadOutcome, Uploader};
use tiles::{PaintJob, Tile};

use crate::priority::{DEAD_TILE_PRIORITY, PriorityInputs, TileRole, ViewState, paint_priority};

/// Paints one tile and uploads the result. Holds the tile's pending-request
/// slot from construction until drop.
pub struct PaintTileOperation {
    tile: Weak<Tile>,
    tile_id: TileId,
    group: GroupId,
    scale: f32,
    role: TileRole,
    painter: Arc<dyn TilePainter>,
    view: Arc<ViewState>,
    uploader: Uploader,
}

impl fmt::Debug for PaintTileOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PaintTileOperation")
            .field("tile_id", &self.tile_id)
            .field("group", &self.group)
            .field("scale", &self.scale)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl PaintTileOperation {
    /// `None` when a request for `tile` is already queued or running.
    pub fn new(
        tile: &Arc<Tile>,
        role: TileRole,
        painter: Arc<dyn TilePainter>,
        view: Arc<ViewState>,
        uploader: Uploader,
    ) -> Option<Self> {
        if !tile.begin_paint_request() {
            return None;
        }
        Some(Self {
            tile: Arc::downgrade(tile),
            tile_id: tile.id(),
            group: tile.group(),
            scale: tile.scale(),
            role,
            painter,
            view,
            uploader,
        })
    }

    pub fn tile_id(&self) -> TileId {
        self.tile_id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn role(&self) -> TileRole {
        self.role
    }

    pub fn painter(&self) -> &Arc<dyn TilePainter> {
        &self.painter
    }

    pub fn paints_with(&self, painter: &Arc<dyn TilePainter>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.painter), Arc::as_ptr(painter))
    }

    /// The tile's current scale, or the one it had when queued once it is gone.
    pub fn scale(&self) -> f32 {
        self.tile.upgrade().map_or(self.scale, |tile| tile.scale())
    }

    fn paint(&self, tile: &Arc<Tile>) {
        let Some(PaintJob { ticket, target }) = tile.prepare_write() else {
            debug!("tile {:?} has nothing to paint", self.tile_id);
            return;
        };
        let bitmap = match self.painter.paint(&target) {
            Ok(bitmap) => bitmap,
            Err(error) => {
                warn!("painting tile {:?} failed: {error}", self.tile_id);
                return;
            }
        };
        match self.uploader.upload(ticket, &bitmap) {
            Ok(UploadOutcome::Committed(outcome)) => {
                debug!(
                    "tile {:?} region {:?} uploaded directly ({outcome:?})",
                    self.tile_id, target.region
                );
            }
            Ok(UploadOutcome::Queued) => {
                debug!(
                    "tile {:?} region {:?} queued for transfer",
                    self.tile_id, target.region
                );
            }
            Ok(UploadOutcome::Obsolete) => {}
            Err(UploadError::Interrupted) => {
                debug!("upload of tile {:?} interrupted by cancellation", self.tile_id);
            }
            Err(error) => warn!("upload of tile {:?} failed: {error}", self.tile_id),
        }
    }
}

impl QueuedOperation for PaintTileOperation {
    fn priority(&self) -> i32 {
        let Some(tile) = self.tile.upgrade() else {
            return DEAD_TILE_PRIORITY;
        };
        paint_priority(PriorityInputs {
            role: self.role,
            scrolling: self.view.is_scrolling(),
            scrolling_down: self.view.is_scrolling_down(),
            current_frame: self.view.frame(),
            tile_draw_count: tile.draw_count(),
            showing_content: tile.draw_binding().is_some(),
            coord: tile.coord(),
        })
    }

    fn run(&self) {
        if let Some(tile) = self.tile.upgrade() {
            self.paint(&tile);
        }
    }
}

impl Drop for PaintTileOperation {
    fn drop(&mut self) {
        if let Some(tile) = self.tile.upgrade() {
            tile.end_paint_request();
        }
        if let Some(transfer) = self.uploader.transfer_queue() {
            transfer.notify_ready();
        }
    }
}
