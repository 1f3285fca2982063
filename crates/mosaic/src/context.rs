use std::cell::RefCell;
use std::sync::Arc;

use log::{debug, info};
use paint_scheduler::{CancelOutcome, PaintScheduler, SchedulerStats};
use render_protocol::{CancelListener, GroupId, IntRect, TileCoord, TileId, TilePainter};
use texture_upload::{TextureBackend, TransferQueue, TransferReport, TransferStats, Uploader};
use tiles::{DrawBinding, PoolStats, TexturePool, Tile, TileTexture};

use crate::MosaicError;
use crate::config::MosaicConfig;
use crate::filters::CancelFilter;
use crate::operation::PaintTileOperation;
use crate::priority::{TileRole, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicStats {
    pub pool: PoolStats,
    pub scheduler: SchedulerStats,
    pub transfer: TransferStats,
}

/// Texture pool, paint worker and upload path for one rendering surface.
/// The drawing thread owns it; the paint worker only sees what each queued
/// operation carries.
pub struct TileContext {
    scheduler: PaintScheduler<PaintTileOperation>,
    pool: TexturePool,
    backend: Arc<dyn TextureBackend>,
    transfer: Arc<TransferQueue>,
    uploader: Uploader,
    view: Arc<ViewState>,
    config: MosaicConfig,
}

impl TileContext {
    pub fn new(config: MosaicConfig, backend: Arc<dyn TextureBackend>) -> Result<Self, MosaicError> {
        config.validate()?;
        let pool = TexturePool::new(config.pool.with_platform_limit(backend.max_texture_count()))?;
        let transfer = Arc::new(TransferQueue::new(config.transfer)?);
        let uploader = Uploader::new(
            Arc::clone(&backend),
            Some(Arc::clone(&transfer)),
            config.upload,
        );
        let listener: Arc<dyn CancelListener> = transfer.clone();
        let scheduler = PaintScheduler::start(&config.worker_thread_name, Some(listener))?;
        info!(
            "tile context ready: {}x{} tiles, pool cap {}, {} transfer slots, shared path {}",
            config.pool.tile_width,
            config.pool.tile_height,
            pool.hard_cap(),
            transfer.slot_count(),
            uploader.capabilities().shared_buffer_path
        );
        Ok(Self {
            scheduler,
            pool,
            backend,
            transfer,
            uploader,
            view: Arc::new(ViewState::new()),
            config,
        })
    }

    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    pub fn scheduler(&self) -> &PaintScheduler<PaintTileOperation> {
        &self.scheduler
    }

    pub fn transfer_queue(&self) -> &Arc<TransferQueue> {
        &self.transfer
    }

    pub fn view(&self) -> &Arc<ViewState> {
        &self.view
    }

    pub fn create_tile(&self, group: GroupId, coord: TileCoord, scale: f32) -> Arc<Tile> {
        self.pool.create_tile(group, coord, scale)
    }

    pub fn acquire_texture(&self, tile: &Arc<Tile>) -> Option<Arc<TileTexture>> {
        self.pool.acquire(tile)
    }

    pub fn reset_usage(&self, group: GroupId) -> usize {
        self.pool.reset_usage(group)
    }

    pub fn grow_to(&self, max_count: usize) -> usize {
        self.pool.grow_to(max_count)
    }

    /// Starts a new frame; queued priorities see the new frame number.
    pub fn begin_frame(&self) -> u64 {
        self.view.advance_frame()
    }

    pub fn set_scrolling(&self, scrolling: bool, down: bool) {
        self.view.set_scrolling(scrolling, down);
    }

    pub fn record_group_draw(&self, group: GroupId) -> u64 {
        self.pool.record_group_draw(group)
    }

    pub fn mark_tile_drawn(&self, tile: &Tile) {
        tile.mark_drawn(self.view.frame());
    }

    pub fn invalidate_tile(&self, tile: &Tile, rect: IntRect) {
        tile.invalidate(rect);
    }

    /// Queues a paint for `tile`. `Ok(false)` when it is up to date or a
    /// request for it is already pending.
    pub fn schedule_paint(
        &self,
        tile: &Arc<Tile>,
        role: TileRole,
        painter: &Arc<dyn TilePainter>,
    ) -> Result<bool, MosaicError> {
        if !tile.needs_paint() {
            return Ok(false);
        }
        let Some(operation) = PaintTileOperation::new(
            tile,
            role,
            Arc::clone(painter),
            Arc::clone(&self.view),
            self.uploader.clone(),
        ) else {
            return Ok(false);
        };
        self.scheduler.schedule(operation)?;
        Ok(true)
    }

    /// Removes matching queued requests. With `wait_for_running`, also waits
    /// for a matching running request and abandons any transfer it left
    /// pending, so its texture is no longer busy on return.
    pub fn cancel_matching(&self, filter: &CancelFilter, wait_for_running: bool) -> CancelOutcome {
        let matched = RefCell::new(Vec::<TileId>::new());
        let outcome = self.scheduler.cancel(
            |operation| {
                let hit = filter.matches(operation);
                if hit {
                    matched.borrow_mut().push(operation.tile_id());
                }
                hit
            },
            wait_for_running,
        );
        if outcome.waited {
            let matched = matched.into_inner();
            let discarded = self
                .transfer
                .discard_matching(|ticket| matched.contains(&ticket.tile_id()));
            if discarded > 0 {
                debug!("cancel {filter:?} abandoned {discarded} pending transfers");
            }
        }
        debug!("cancel {filter:?}: {outcome:?}");
        outcome
    }

    pub fn cancel_group(&self, group: GroupId, wait_for_running: bool) -> CancelOutcome {
        self.cancel_matching(&CancelFilter::Group(group), wait_for_running)
    }

    pub fn cancel_tile(&self, tile: &Tile, wait_for_running: bool) -> CancelOutcome {
        self.cancel_matching(&CancelFilter::Tile(tile.id()), wait_for_running)
    }

    pub fn cancel_painter(
        &self,
        painter: &Arc<dyn TilePainter>,
        wait_for_running: bool,
    ) -> CancelOutcome {
        self.cancel_matching(&CancelFilter::Painter(Arc::clone(painter)), wait_for_running)
    }

    /// Drops requests of `painter` painted at any scale other than `scale`.
    pub fn cancel_stale_scale(&self, painter: &Arc<dyn TilePainter>, scale: f32) -> CancelOutcome {
        self.cancel_matching(
            &CancelFilter::StaleScale {
                painter: Arc::clone(painter),
                scale,
            },
            false,
        )
    }

    /// Consumer side of the transfer queue. Call on the thread that owns the
    /// GPU context, typically once per frame.
    pub fn process_transfers(&self) -> TransferReport {
        self.transfer.process_pending(self.backend.as_ref())
    }

    /// Drops pending transfers after the GPU context was lost.
    pub fn discard_transfers(&self) -> usize {
        self.transfer.discard_queue()
    }

    /// Processes transfers until the paint worker is idle and nothing is
    /// pending. Must run on the consumer thread. Sleeps between passes until
    /// a transfer is queued or a paint request finishes.
    pub fn drain(&self) -> TransferReport {
        let mut total = TransferReport::default();
        loop {
            let pass = self.process_transfers();
            total.blitted += pass.blitted;
            total.obsolete += pass.obsolete;
            total.failed += pass.failed;
            let scheduler = self.scheduler.stats();
            if scheduler.queued == 0 && !scheduler.running && !self.transfer.has_pending() {
                return total;
            }
            self.transfer.wait_ready();
        }
    }

    pub fn draw_binding(&self, tile: &Tile) -> Option<DrawBinding> {
        tile.draw_binding()
    }

    /// Frees backend images of textures nobody is drawing. With
    /// `spare_most_recent`, the most recently drawn tiles keep theirs.
    pub fn trim_gpu_memory(&self, spare_most_recent: bool) -> usize {
        self.pool.discard_gpu_memory(spare_most_recent, |texture| {
            self.backend.discard_image(texture.id());
        })
    }

    /// Cancels queued work for `tile` and hands its texture back to the pool.
    pub fn release_tile(&self, tile: &Tile) -> Option<Arc<TileTexture>> {
        self.cancel_tile(tile, false);
        tile.detach_texture()
    }

    pub fn stats(&self) -> MosaicStats {
        MosaicStats {
            pool: self.pool.stats(),
            scheduler: self.scheduler.stats(),
            transfer: self.transfer.stats(),
        }
    }

    /// Stops the paint worker and drops every pending transfer. A worker
    /// waiting for a transfer slot is released first.
    pub fn shutdown(&self) {
        self.transfer.interrupt(true);
        self.scheduler.shutdown();
        let discarded = self.transfer.discard_queue();
        if discarded > 0 {
            debug!("tile context dropped {discarded} transfers at shutdown");
        }
    }
}

impl Drop for TileContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
