use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use render_protocol::{GroupId, TextureId};

use crate::config::TexturePoolConfig;
use crate::texture::{CandidateSnapshot, TileTexture};
use crate::tile::Tile;
use crate::TexturePoolError;

/// Per-group draw registration counters. Older registrations lose eviction ties.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    registrations: HashMap<GroupId, u64>,
    next_registration: u64,
}

impl GroupRegistry {
    pub fn registration(&self, group: GroupId) -> u64 {
        self.registrations.get(&group).copied().unwrap_or(0)
    }

    pub fn set_registration(&mut self, group: GroupId, counter: u64) {
        self.registrations.insert(group, counter);
        self.next_registration = self.next_registration.max(counter);
    }

    pub fn record_draw(&mut self, group: GroupId) -> u64 {
        self.next_registration += 1;
        let counter = self.next_registration;
        self.registrations.insert(group, counter);
        counter
    }

    pub fn forget(&mut self, group: GroupId) {
        self.registrations.remove(&group);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CandidateView {
    pub used_level: i32,
    pub busy: bool,
    pub owner_alive: bool,
    pub owned: bool,
    pub registration: u64,
}

impl CandidateView {
    fn from_snapshot(snapshot: CandidateSnapshot, groups: &GroupRegistry) -> Self {
        let (owned, owner_alive, registration) = match snapshot.owner {
            Some((alive, group)) => (true, alive, groups.registration(group)),
            None => (false, false, 0),
        };
        Self {
            used_level: snapshot.used_level,
            busy: snapshot.busy,
            owner_alive,
            owned,
            registration,
        }
    }

    fn is_free(&self) -> bool {
        self.used_level < 0 || !self.owned || !self.owner_alive
    }
}

/// Eviction choice: the first free texture wins outright; otherwise the
/// largest `used_level`, ties going to the oldest group registration and then
/// to the lowest index. Busy textures are never candidates.
pub(crate) fn select_candidate(views: &[CandidateView]) -> Option<usize> {
    let mut best: Option<(usize, CandidateView)> = None;
    for (index, view) in views.iter().enumerate() {
        if view.busy {
            continue;
        }
        if view.is_free() {
            return Some(index);
        }
        let better = match best {
            None => true,
            Some((_, current)) => {
                view.used_level > current.used_level
                    || (view.used_level == current.used_level
                        && view.registration < current.registration)
            }
        };
        if better {
            best = Some((index, *view));
        }
    }
    best.map(|(index, _)| index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub textures: usize,
    pub owned: usize,
    pub busy: usize,
    pub free: usize,
    pub with_image: usize,
}

#[derive(Debug)]
struct PoolInner {
    textures: Vec<Arc<TileTexture>>,
    groups: GroupRegistry,
    next_texture_id: u32,
}

/// Bounded, lazily grown set of tile textures shared by every group.
#[derive(Debug)]
pub struct TexturePool {
    config: TexturePoolConfig,
    inner: Mutex<PoolInner>,
}

impl TexturePool {
    pub fn new(config: TexturePoolConfig) -> Result<Self, TexturePoolError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(PoolInner {
                textures: Vec::new(),
                groups: GroupRegistry::default(),
                next_texture_id: 0,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("texture pool lock poisoned")
    }

    pub fn config(&self) -> &TexturePoolConfig {
        &self.config
    }

    pub fn hard_cap(&self) -> usize {
        self.config.hard_cap() as usize
    }

    pub fn len(&self) -> usize {
        self.inner().textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn textures(&self) -> Vec<Arc<TileTexture>> {
        self.inner().textures.clone()
    }

    /// Creates a tile sized for this pool's textures.
    pub fn create_tile(
        &self,
        group: GroupId,
        coord: render_protocol::TileCoord,
        scale: f32,
    ) -> Arc<Tile> {
        Tile::new(
            group,
            coord,
            scale,
            self.config.tile_width,
            self.config.tile_height,
        )
    }

    /// Grows the pool up to `min(max_count, hard_cap)`. Never shrinks.
    pub fn grow_to(&self, max_count: usize) -> usize {
        let target = max_count.min(self.hard_cap());
        let mut inner = self.inner();
        let before = inner.textures.len();
        while inner.textures.len() < target {
            let id = TextureId(inner.next_texture_id);
            inner.next_texture_id += 1;
            inner.textures.push(Arc::new(TileTexture::new(
                id,
                self.config.tile_width,
                self.config.tile_height,
            )));
        }
        let after = inner.textures.len();
        if after > before {
            info!("texture pool grew from {before} to {after} textures (cap {})", self.hard_cap());
        } else if max_count > after {
            debug!("texture pool already at hard cap {after}, requested {max_count}");
        }
        after
    }

    /// Returns a texture owned by `tile`, stealing the least valuable one when
    /// needed. `None` means nothing is available this frame; never blocks on a
    /// busy texture.
    pub fn acquire(&self, tile: &Arc<Tile>) -> Option<Arc<TileTexture>> {
        let inner = self.inner();

        if let Some(texture) = tile.texture() {
            if texture.mark_used_by(tile.id()) {
                return Some(texture);
            }
        }

        let views: Vec<CandidateView> = inner
            .textures
            .iter()
            .map(|texture| CandidateView::from_snapshot(texture.candidate_snapshot(), &inner.groups))
            .collect();
        let Some(index) = select_candidate(&views) else {
            debug!(
                "no texture available for tile {:?} among {} textures",
                tile.id(),
                views.len()
            );
            return None;
        };
        let texture = Arc::clone(&inner.textures[index]);

        let previous = match texture.transfer_to(tile) {
            Ok(previous) => previous,
            Err(busy) => {
                warn!("texture steal for tile {:?} lost a race: {busy}", tile.id());
                return None;
            }
        };
        if let Some(previous) = previous.as_ref().and_then(|owner| owner.resolve()) {
            if previous.id() != tile.id() {
                debug!(
                    "texture {:?} stolen from tile {:?} (level {}) for tile {:?}",
                    texture.id(),
                    previous.id(),
                    views[index].used_level,
                    tile.id()
                );
                previous.remove_texture(&texture);
            }
        }
        if let Some(stale) = tile.texture() {
            if !Arc::ptr_eq(&stale, &texture) {
                debug!(
                    "tile {:?} replaces stale texture {:?} with {:?}",
                    tile.id(),
                    stale.id(),
                    texture.id()
                );
            }
        }
        tile.attach_texture(Arc::clone(&texture));
        Some(texture)
    }

    /// Marks every texture owned by `group` as unused without detaching it.
    pub fn reset_usage(&self, group: GroupId) -> usize {
        let inner = self.inner();
        let count = inner
            .textures
            .iter()
            .filter(|texture| texture.reset_usage_for_group(group))
            .count();
        debug!("reset usage of {count} textures for group {group:?}");
        count
    }

    pub fn set_group_registration(&self, group: GroupId, counter: u64) {
        self.inner().groups.set_registration(group, counter);
    }

    /// Bumps `group` to the newest registration and returns the counter.
    pub fn record_group_draw(&self, group: GroupId) -> u64 {
        self.inner().groups.record_draw(group)
    }

    pub fn group_registration(&self, group: GroupId) -> u64 {
        self.inner().groups.registration(group)
    }

    pub fn forget_group(&self, group: GroupId) {
        self.inner().groups.forget(group);
    }

    /// Releases GPU images of idle textures. With `spare_most_recent`, textures
    /// whose owner was drawn in the most recent frame keep theirs. `discard` is
    /// called for every texture whose image was dropped.
    pub fn discard_gpu_memory<F>(&self, spare_most_recent: bool, mut discard: F) -> usize
    where
        F: FnMut(&TileTexture),
    {
        let inner = self.inner();
        let owners: Vec<Option<Arc<Tile>>> =
            inner.textures.iter().map(|texture| texture.owner()).collect();
        let latest_draw = if spare_most_recent {
            owners
                .iter()
                .flatten()
                .map(|tile| tile.draw_count())
                .max()
        } else {
            None
        };

        let mut discarded = 0;
        for (texture, owner) in inner.textures.iter().zip(&owners) {
            let spared = match (latest_draw, owner) {
                (Some(latest), Some(tile)) => tile.draw_count() == latest,
                _ => false,
            };
            if spared || texture.image().is_none() {
                continue;
            }
            if texture.discard_image() {
                if let Some(tile) = owner {
                    tile.content_lost(texture);
                }
                discard(texture);
                discarded += 1;
            }
        }
        info!(
            "discarded gpu memory of {discarded} of {} textures",
            inner.textures.len()
        );
        discarded
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner();
        let mut stats = PoolStats {
            textures: inner.textures.len(),
            ..PoolStats::default()
        };
        for texture in &inner.textures {
            let snapshot = texture.candidate_snapshot();
            let view = CandidateView::from_snapshot(snapshot, &inner.groups);
            if view.owned && view.owner_alive {
                stats.owned += 1;
            }
            if view.busy {
                stats.busy += 1;
            }
            if view.is_free() && !view.busy {
                stats.free += 1;
            }
            if texture.image().is_some() {
                stats.with_image += 1;
            }
        }
        stats
    }
}
