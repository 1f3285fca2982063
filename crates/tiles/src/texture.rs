use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use render_protocol::{GroupId, PixelFormat, TextureId, TileCoord, TileId};

use crate::tile::Tile;

/// `used_level` of a texture nobody currently needs.
pub const UNUSED_LEVEL: i32 = -1;

/// Identity of the content last committed into a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTileInfo {
    pub tile: TileId,
    pub group: GroupId,
    pub coord: TileCoord,
    pub scale: f32,
    pub generation: u64,
}

impl TextureTileInfo {
    /// Same tile at the same place and scale, regardless of content generation.
    pub fn same_placement(&self, other: &TextureTileInfo) -> bool {
        self.tile == other.tile
            && self.group == other.group
            && self.coord == other.coord
            && self.scale == other.scale
    }
}

/// Dimensions and format of the GPU image currently backing a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Weak back-reference from a texture to the tile that owns it.
#[derive(Clone)]
pub struct OwnerRef {
    tile: Weak<Tile>,
    id: TileId,
    group: GroupId,
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OwnerRef")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl OwnerRef {
    pub(crate) fn new(tile: &Arc<Tile>) -> Self {
        Self {
            tile: Arc::downgrade(tile),
            id: tile.id(),
            group: tile.group(),
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn is_alive(&self) -> bool {
        self.tile.strong_count() > 0
    }

    pub fn resolve(&self) -> Option<Arc<Tile>> {
        self.tile.upgrade()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CandidateSnapshot {
    pub used_level: i32,
    pub busy: bool,
    pub owner: Option<(bool, GroupId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    Released,
    Delayed,
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Content is now displayable for the owning tile.
    Shown,
    /// The texture changed hands while busy; the pixels are never shown.
    Discarded,
}

#[derive(Debug)]
struct TextureState {
    used_level: i32,
    owner: Option<OwnerRef>,
    busy: bool,
    delayed_release: bool,
    content: Option<TextureTileInfo>,
    image: Option<ImageDims>,
}

impl TextureState {
    fn owned_by(&self, tile: TileId) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.id == tile)
    }

    fn clear_owner(&mut self) -> Option<OwnerRef> {
        self.used_level = UNUSED_LEVEL;
        self.delayed_release = false;
        self.content = None;
        self.owner.take()
    }
}

/// A pooled texture slot. The object lives as long as the pool; only its
/// ownership and GPU image change.
#[derive(Debug)]
pub struct TileTexture {
    id: TextureId,
    width: u32,
    height: u32,
    state: Mutex<TextureState>,
}

impl TileTexture {
    pub(crate) fn new(id: TextureId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            state: Mutex::new(TextureState {
                used_level: UNUSED_LEVEL,
                owner: None,
                busy: false,
                delayed_release: false,
                content: None,
                image: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TextureState> {
        self.state.lock().expect("texture state lock poisoned")
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn used_level(&self) -> i32 {
        self.state().used_level
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub fn owner_id(&self) -> Option<TileId> {
        self.state().owner.as_ref().map(OwnerRef::id)
    }

    /// Resolves the owner and confirms the tile still points back at this
    /// texture. A stale back-reference yields `None`.
    pub fn owner(&self) -> Option<Arc<Tile>> {
        let owner = self.state().owner.clone()?;
        let tile = owner.resolve()?;
        if tile.holds_texture(self) {
            Some(tile)
        } else {
            None
        }
    }

    pub fn content(&self) -> Option<TextureTileInfo> {
        self.state().content
    }

    pub fn image(&self) -> Option<ImageDims> {
        self.state().image
    }

    /// Draw-time readiness: not being written, owned by `info.tile`, holding
    /// exactly that content.
    pub fn ready_for(&self, info: &TextureTileInfo) -> bool {
        let state = self.state();
        !state.busy
            && !state.delayed_release
            && state.owned_by(info.tile)
            && state.image.is_some()
            && state.content.as_ref() == Some(info)
    }

    pub(crate) fn displayable_content(&self, tile: TileId) -> Option<TextureTileInfo> {
        let state = self.state();
        if state.busy || state.delayed_release || !state.owned_by(tile) || state.image.is_none() {
            return None;
        }
        state.content
    }

    /// Drops the GPU image bookkeeping. Busy textures keep theirs.
    pub fn discard_image(&self) -> bool {
        let mut state = self.state();
        if state.busy {
            return false;
        }
        state.content = None;
        state.image.take().is_some()
    }

    pub(crate) fn mark_used_by(&self, tile: TileId) -> bool {
        let mut state = self.state();
        if !state.owned_by(tile) || state.delayed_release {
            return false;
        }
        state.used_level = 0;
        true
    }

    pub(crate) fn candidate_snapshot(&self) -> CandidateSnapshot {
        let state = self.state();
        CandidateSnapshot {
            used_level: state.used_level,
            busy: state.busy,
            owner: state
                .owner
                .as_ref()
                .map(|owner| (owner.is_alive(), owner.group)),
        }
    }

    /// Hands the texture to `tile`. Fails while a write is in flight.
    pub(crate) fn transfer_to(&self, tile: &Arc<Tile>) -> Result<Option<OwnerRef>, TextureBusy> {
        let mut state = self.state();
        if state.busy {
            return Err(TextureBusy(self.id));
        }
        let previous = state.clear_owner();
        state.used_level = 0;
        state.owner = Some(OwnerRef::new(tile));
        Ok(previous)
    }

    pub(crate) fn set_used_level_for(&self, tile: TileId, level: i32) -> bool {
        let mut state = self.state();
        if !state.owned_by(tile) {
            return false;
        }
        state.used_level = level;
        true
    }

    pub(crate) fn reset_usage_for_group(&self, group: GroupId) -> bool {
        let mut state = self.state();
        let matches = state.owner.as_ref().is_some_and(|owner| owner.group == group);
        if matches {
            state.used_level = UNUSED_LEVEL;
        }
        matches
    }

    pub(crate) fn release_from(&self, tile: TileId) -> ReleaseOutcome {
        let mut state = self.state();
        if !state.owned_by(tile) {
            return ReleaseOutcome::NotOwner;
        }
        if state.busy {
            state.delayed_release = true;
            state.used_level = UNUSED_LEVEL;
            return ReleaseOutcome::Delayed;
        }
        let _ = state.clear_owner();
        ReleaseOutcome::Released
    }

    /// Content and image snapshot used to decide between full and partial writes.
    pub(crate) fn write_basis(&self) -> (Option<TextureTileInfo>, Option<ImageDims>) {
        let state = self.state();
        (state.content, state.image)
    }

    pub(crate) fn begin_write(&self, tile: TileId) -> bool {
        let mut state = self.state();
        if state.busy || state.delayed_release || !state.owned_by(tile) {
            return false;
        }
        state.busy = true;
        true
    }

    pub(crate) fn is_obsolete_for(&self, tile: TileId) -> bool {
        let state = self.state();
        state.delayed_release || !state.owned_by(tile)
    }

    pub(crate) fn finish_write(&self, info: TextureTileInfo, image: ImageDims) -> CommitOutcome {
        let mut state = self.state();
        assert!(
            state.busy,
            "texture {:?} finished a write it never began",
            self.id
        );
        state.busy = false;
        state.image = Some(image);
        if state.delayed_release || !state.owned_by(info.tile) {
            let _ = state.clear_owner();
            return CommitOutcome::Discarded;
        }
        state.content = Some(info);
        CommitOutcome::Shown
    }

    pub(crate) fn abandon_write(&self) {
        let mut state = self.state();
        state.busy = false;
        if state.delayed_release {
            let _ = state.clear_owner();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBusy(pub TextureId);

impl fmt::Display for TextureBusy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "texture {:?} is busy", self.0)
    }
}

impl std::error::Error for TextureBusy {}
