use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use render_protocol::{DirtyRegion, GroupId, IntRect, PaintTarget, TileCoord, TileId};

use crate::texture::{ReleaseOutcome, TextureTileInfo, TileTexture};
use crate::write::{PaintJob, WriteTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Unpainted,
    Painting,
    Ready,
}

/// Texture and content a tile can be drawn with right now.
#[derive(Debug, Clone)]
pub struct DrawBinding {
    pub texture: Arc<TileTexture>,
    pub info: TextureTileInfo,
    /// False while newer invalidations are still waiting to be painted.
    pub up_to_date: bool,
}

#[derive(Debug)]
struct TileInner {
    coord: TileCoord,
    scale: f32,
    texture: Option<Arc<TileTexture>>,
    state: TileState,
    dirty: DirtyRegion,
    full_repaint: bool,
    repaint_pending: bool,
    draw_count: u64,
    generation: u64,
}

impl TileInner {
    fn holds(&self, texture: &TileTexture) -> bool {
        self.texture
            .as_ref()
            .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), texture))
    }

    fn mark_stale(&mut self) {
        self.generation += 1;
        if self.state == TileState::Ready {
            self.state = TileState::Painting;
        }
    }
}

/// One screen-space cell of the mosaic. Holds at most one texture at a time.
pub struct Tile {
    id: TileId,
    group: GroupId,
    width: u32,
    height: u32,
    inner: Mutex<TileInner>,
}

impl fmt::Debug for Tile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Tile")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Tile {
    pub fn new(group: GroupId, coord: TileCoord, scale: f32, width: u32, height: u32) -> Arc<Self> {
        assert!(
            width > 0 && height > 0,
            "tile size must be non-zero, got {width}x{height}"
        );
        Arc::new(Self {
            id: TileId::next(),
            group,
            width,
            height,
            inner: Mutex::new(TileInner {
                coord,
                scale,
                texture: None,
                state: TileState::Unpainted,
                dirty: DirtyRegion::new(),
                full_repaint: true,
                repaint_pending: false,
                draw_count: 0,
                generation: 0,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, TileInner> {
        self.inner.lock().expect("tile state lock poisoned")
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.width, self.height)
    }

    pub fn coord(&self) -> TileCoord {
        self.inner().coord
    }

    pub fn scale(&self) -> f32 {
        self.inner().scale
    }

    pub fn state(&self) -> TileState {
        self.inner().state
    }

    pub fn draw_count(&self) -> u64 {
        self.inner().draw_count
    }

    pub fn generation(&self) -> u64 {
        self.inner().generation
    }

    pub fn is_repaint_pending(&self) -> bool {
        self.inner().repaint_pending
    }

    pub fn needs_full_repaint(&self) -> bool {
        self.inner().full_repaint
    }

    pub fn dirty_bounds(&self) -> Option<IntRect> {
        self.inner().dirty.bounds()
    }

    /// The texture this tile last acquired. It may have been stolen since; use
    /// [`Tile::owns_texture`] or [`Tile::draw_binding`] before trusting it.
    pub fn texture(&self) -> Option<Arc<TileTexture>> {
        self.inner().texture.clone()
    }

    pub fn owns_texture(&self) -> bool {
        let inner = self.inner();
        inner
            .texture
            .as_ref()
            .is_some_and(|texture| texture.owner_id() == Some(self.id))
    }

    pub(crate) fn holds_texture(&self, texture: &TileTexture) -> bool {
        self.inner().holds(texture)
    }

    pub(crate) fn matches_placement(&self, info: &TextureTileInfo) -> bool {
        let inner = self.inner();
        self.id == info.tile && inner.coord == info.coord && inner.scale == info.scale
    }

    /// Moves the tile to another grid cell or scale. Returns whether anything changed.
    pub fn set_contents(&self, coord: TileCoord, scale: f32) -> bool {
        let mut inner = self.inner();
        if inner.coord == coord && inner.scale == scale {
            return false;
        }
        inner.coord = coord;
        inner.scale = scale;
        inner.dirty.clear();
        inner.full_repaint = true;
        inner.mark_stale();
        true
    }

    /// Marks a tile-local rectangle as needing a repaint.
    pub fn invalidate(&self, rect: IntRect) {
        let Some(clipped) = rect.intersect(&self.bounds()) else {
            return;
        };
        let mut inner = self.inner();
        inner.dirty.add(clipped);
        inner.mark_stale();
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner();
        inner.dirty.clear();
        inner.full_repaint = true;
        inner.mark_stale();
    }

    pub fn needs_paint(&self) -> bool {
        self.inner().state != TileState::Ready
    }

    /// Claims the single pending-request slot. Returns false when a request for
    /// this tile is already queued or running.
    pub fn begin_paint_request(&self) -> bool {
        let mut inner = self.inner();
        if inner.repaint_pending {
            return false;
        }
        inner.repaint_pending = true;
        inner.state = TileState::Painting;
        true
    }

    pub fn end_paint_request(&self) {
        self.inner().repaint_pending = false;
    }

    /// Forwards a distance metric to the owned texture.
    pub fn set_used_level(&self, level: i32) -> bool {
        let inner = self.inner();
        inner
            .texture
            .as_ref()
            .is_some_and(|texture| texture.set_used_level_for(self.id, level))
    }

    pub fn mark_drawn(&self, frame: u64) {
        let mut inner = self.inner();
        inner.draw_count = inner.draw_count.max(frame);
    }

    /// Gives the texture back to the pool. A busy texture is released once its
    /// write completes; that content is never shown.
    pub fn detach_texture(&self) -> Option<Arc<TileTexture>> {
        let mut inner = self.inner();
        let texture = inner.texture.take()?;
        inner.state = TileState::Unpainted;
        inner.full_repaint = true;
        inner.dirty.clear();
        if texture.release_from(self.id) == ReleaseOutcome::Delayed {
            debug!(
                "tile {:?} detached busy texture {:?}; release delayed",
                self.id,
                texture.id()
            );
        }
        Some(texture)
    }

    pub fn draw_binding(&self) -> Option<DrawBinding> {
        let inner = self.inner();
        let texture = inner.texture.clone()?;
        let info = texture.displayable_content(self.id)?;
        if info.coord != inner.coord || info.scale != inner.scale {
            return None;
        }
        Some(DrawBinding {
            up_to_date: info.generation == inner.generation,
            texture,
            info,
        })
    }

    /// Marks the owned texture busy and snapshots what has to be painted.
    /// `None` when there is no owned texture, it is busy, or nothing is stale.
    pub fn prepare_write(self: &Arc<Self>) -> Option<PaintJob> {
        let mut inner = self.inner();
        let texture = inner.texture.clone()?;
        let info = TextureTileInfo {
            tile: self.id,
            group: self.group,
            coord: inner.coord,
            scale: inner.scale,
            generation: inner.generation,
        };
        let (content, image) = texture.write_basis();
        let content_usable = content.is_some_and(|content| content.same_placement(&info))
            && image.is_some_and(|image| image.width == self.width && image.height == self.height);

        if !inner.full_repaint && inner.dirty.is_empty() && content == Some(info) {
            inner.state = TileState::Ready;
            return None;
        }

        let full_rect = self.bounds();
        let region = match inner.dirty.bounds() {
            Some(bounds)
                if !inner.full_repaint
                    && content_usable
                    && bounds.width < self.width
                    && bounds.height < self.height =>
            {
                bounds
            }
            _ => full_rect,
        };
        let full = region == full_rect;

        if !texture.begin_write(self.id) {
            return None;
        }
        inner.state = TileState::Painting;
        let restore = std::mem::take(&mut inner.dirty);
        let restore_full = std::mem::replace(&mut inner.full_repaint, false) || full;

        let target = PaintTarget {
            tile_id: self.id,
            group: self.group,
            coord: info.coord,
            scale: info.scale,
            tile_width: self.width,
            tile_height: self.height,
            region,
            full_repaint: full,
        };
        drop(inner);
        Some(PaintJob {
            ticket: WriteTicket::new(texture, Arc::downgrade(self), info, region, restore, restore_full),
            target,
        })
    }

    pub(crate) fn remove_texture(&self, texture: &TileTexture) {
        let mut inner = self.inner();
        if !inner.holds(texture) {
            return;
        }
        inner.texture = None;
        inner.state = TileState::Unpainted;
        inner.full_repaint = true;
        inner.dirty.clear();
    }

    pub(crate) fn attach_texture(&self, texture: Arc<TileTexture>) {
        let mut inner = self.inner();
        inner.texture = Some(texture);
        inner.full_repaint = true;
        if inner.state == TileState::Ready {
            inner.state = TileState::Unpainted;
        }
    }

    pub(crate) fn content_lost(&self, texture: &TileTexture) {
        let mut inner = self.inner();
        if !inner.holds(texture) {
            return;
        }
        inner.full_repaint = true;
        if inner.state == TileState::Ready {
            inner.state = TileState::Unpainted;
        }
    }

    pub(crate) fn complete_write(&self, texture: &TileTexture, generation: u64) {
        let mut inner = self.inner();
        if inner.holds(texture) && inner.generation == generation {
            inner.state = TileState::Ready;
        }
    }

    pub(crate) fn restore_dirty(&self, dirty: &DirtyRegion, full: bool) {
        let mut inner = self.inner();
        inner.dirty.union_with(dirty);
        inner.full_repaint |= full;
    }
}

impl Drop for Tile {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(texture) = inner.texture.take() {
            let _ = texture.release_from(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> Arc<Tile> {
        Tile::new(GroupId(1), TileCoord::new(0, 0), 1.0, 64, 64)
    }

    #[test]
    fn new_tile_is_unpainted_and_needs_full_repaint() {
        let tile = tile();
        assert_eq!(tile.state(), TileState::Unpainted);
        assert!(tile.needs_full_repaint());
        assert!(tile.texture().is_none());
        assert!(tile.prepare_write().is_none());
    }

    #[test]
    fn invalidate_clips_to_tile_bounds() {
        let tile = tile();
        tile.invalidate(IntRect::new(60, 60, 20, 20));
        assert_eq!(tile.dirty_bounds(), Some(IntRect::new(60, 60, 4, 4)));
        let generation = tile.generation();
        tile.invalidate(IntRect::new(100, 100, 5, 5));
        assert_eq!(tile.generation(), generation);
    }

    #[test]
    fn only_one_paint_request_may_be_pending() {
        let tile = tile();
        assert!(tile.begin_paint_request());
        assert!(!tile.begin_paint_request());
        assert_eq!(tile.state(), TileState::Painting);
        tile.end_paint_request();
        assert!(tile.begin_paint_request());
    }

    #[test]
    fn set_contents_reports_changes_only() {
        let tile = tile();
        assert!(!tile.set_contents(TileCoord::new(0, 0), 1.0));
        assert!(tile.set_contents(TileCoord::new(0, 1), 1.0));
        assert!(tile.set_contents(TileCoord::new(0, 1), 2.0));
        assert_eq!(tile.coord(), TileCoord::new(0, 1));
        assert_eq!(tile.scale(), 2.0);
    }
}
