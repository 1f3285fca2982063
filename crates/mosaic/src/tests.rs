use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use paint_scheduler::{CancelOutcome, SchedulerError};
use render_protocol::{
    BitmapConfig, GroupId, IntRect, PaintError, PaintTarget, PaintedBitmap, TileCoord, TileId,
    TilePainter,
};
use texture_upload::{MemoryTextureBackend, TextureBackend, TransferQueueConfig};
use tiles::{TexturePoolConfig, Tile, TileState};

use super::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fill(target: &PaintTarget, value: u8) -> PaintedBitmap {
    PaintedBitmap::filled(
        target.region.width,
        target.region.height,
        BitmapConfig::Argb8888,
        value,
    )
    .expect("bitmap")
}

struct SolidPainter {
    value: u8,
    calls: AtomicUsize,
}

impl SolidPainter {
    fn shared(value: u8) -> Arc<dyn TilePainter> {
        Arc::new(Self {
            value,
            calls: AtomicUsize::new(0),
        })
    }
}

impl TilePainter for SolidPainter {
    fn paint(&self, target: &PaintTarget) -> Result<PaintedBitmap, PaintError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(fill(target, self.value))
    }
}

/// Reports each tile it starts painting and records the order.
struct SignalPainter {
    painting: Sender<TileId>,
    order: Mutex<Vec<TileCoord>>,
}

impl TilePainter for SignalPainter {
    fn paint(&self, target: &PaintTarget) -> Result<PaintedBitmap, PaintError> {
        self.order
            .lock()
            .expect("paint order lock poisoned")
            .push(target.coord);
        self.painting
            .send(target.tile_id)
            .expect("send painting signal");
        Ok(fill(target, 7))
    }
}

/// Holds the worker inside `paint` until the gate opens.
struct GatedPainter {
    started: Sender<TileId>,
    gate: Receiver<()>,
}

impl TilePainter for GatedPainter {
    fn paint(&self, target: &PaintTarget) -> Result<PaintedBitmap, PaintError> {
        self.started.send(target.tile_id).expect("send started");
        self.gate.recv().expect("gate closed");
        Ok(fill(target, 3))
    }
}

struct FailingPainter;

impl TilePainter for FailingPainter {
    fn paint(&self, _target: &PaintTarget) -> Result<PaintedBitmap, PaintError> {
        Err(PaintError::ContentUnavailable)
    }
}

fn config(slot_count: usize) -> MosaicConfig {
    MosaicConfig {
        pool: TexturePoolConfig {
            tile_width: 8,
            tile_height: 8,
            viewport_columns: 2,
            viewport_rows: 2,
            prefetch_distance: 0,
            buffering_factor: 2,
            platform_max_textures: 64,
        },
        transfer: TransferQueueConfig { slot_count },
        ..MosaicConfig::default()
    }
}

fn context(slot_count: usize) -> (TileContext, Arc<MemoryTextureBackend>) {
    init_logging();
    let backend = Arc::new(MemoryTextureBackend::new());
    let context = TileContext::new(
        config(slot_count),
        Arc::clone(&backend) as Arc<dyn TextureBackend>,
    )
    .expect("TileContext::new");
    context.grow_to(8);
    (context, backend)
}

fn tile_with_texture(context: &TileContext, group: u64, column: i32, row: i32) -> Arc<Tile> {
    let tile = context.create_tile(GroupId(group), TileCoord::new(column, row), 1.0);
    context.acquire_texture(&tile).expect("acquire texture");
    tile
}

fn painted_tile(
    context: &TileContext,
    painter: &Arc<dyn TilePainter>,
    group: u64,
    column: i32,
) -> Arc<Tile> {
    let tile = tile_with_texture(context, group, column, 0);
    assert!(
        context
            .schedule_paint(&tile, TileRole::Base, painter)
            .expect("schedule")
    );
    context.drain();
    assert_eq!(tile.state(), TileState::Ready);
    tile
}

/// Occupies the worker with a gated paint of a tile in group 99.
fn block_worker(context: &TileContext) -> (Arc<Tile>, Sender<()>) {
    let (started_sender, started) = unbounded();
    let (gate_sender, gate) = unbounded();
    let painter: Arc<dyn TilePainter> = Arc::new(GatedPainter {
        started: started_sender,
        gate,
    });
    let blocker = tile_with_texture(context, 99, 7, 7);
    context
        .schedule_paint(&blocker, TileRole::Layer, &painter)
        .expect("schedule blocker");
    assert_eq!(started.recv().expect("blocker started"), blocker.id());
    (blocker, gate_sender)
}

#[test]
fn first_paint_is_uploaded_directly_and_drawable() {
    let (context, backend) = context(2);
    let painter = SolidPainter::shared(1);
    let tile = painted_tile(&context, &painter, 1, 0);

    let binding = context.draw_binding(&tile).expect("drawable");
    assert!(binding.up_to_date);
    assert_eq!(backend.replace_count(), 1);
    assert_eq!(context.stats().transfer.enqueued, 0);
    assert!(!tile.is_repaint_pending());
}

#[test]
fn partial_repaint_goes_through_transfer_queue() {
    let (context, backend) = context(2);
    let painter = SolidPainter::shared(1);
    let tile = painted_tile(&context, &painter, 1, 0);

    context.invalidate_tile(&tile, IntRect::new(1, 1, 2, 2));
    assert_eq!(tile.state(), TileState::Painting);
    assert!(context.schedule_paint(&tile, TileRole::Base, &painter).expect("schedule"));
    let report = context.drain();

    assert_eq!(report.blitted, 1);
    assert_eq!(tile.state(), TileState::Ready);
    assert_eq!(backend.update_count(), 1);
    assert_eq!(backend.replace_count(), 1);
}

#[test]
fn up_to_date_tiles_are_not_scheduled() {
    let (context, _backend) = context(2);
    let painter = SolidPainter::shared(1);
    let tile = painted_tile(&context, &painter, 1, 0);
    assert!(!context.schedule_paint(&tile, TileRole::Base, &painter).expect("schedule"));
}

#[test]
fn second_request_for_pending_tile_is_refused() {
    let (context, _backend) = context(2);
    let (_blocker, gate) = block_worker(&context);
    let painter = SolidPainter::shared(1);
    let tile = tile_with_texture(&context, 1, 0, 0);

    assert!(context.schedule_paint(&tile, TileRole::Base, &painter).expect("first"));
    assert!(!context.schedule_paint(&tile, TileRole::Base, &painter).expect("second"));
    assert_eq!(context.stats().scheduler.queued, 1);

    gate.send(()).expect("open gate");
    context.drain();
    assert_eq!(tile.state(), TileState::Ready);
}

#[test]
fn failed_paint_leaves_tile_painting_and_can_be_rescheduled() {
    let (context, _backend) = context(2);
    let failing: Arc<dyn TilePainter> = Arc::new(FailingPainter);
    let tile = tile_with_texture(&context, 1, 0, 0);

    assert!(context.schedule_paint(&tile, TileRole::Base, &failing).expect("schedule"));
    context.drain();
    assert_eq!(tile.state(), TileState::Painting);
    assert!(!tile.is_repaint_pending());
    assert!(tile.needs_full_repaint());
    assert!(!tile.texture().expect("texture").is_busy());

    let painter = SolidPainter::shared(2);
    assert!(context.schedule_paint(&tile, TileRole::Base, &painter).expect("reschedule"));
    context.drain();
    assert_eq!(tile.state(), TileState::Ready);
}

#[test]
fn queued_requests_run_in_priority_order() {
    let (context, _backend) = context(2);
    let (_blocker, gate) = block_worker(&context);
    let (painting, _signals) = unbounded();
    let recorder = Arc::new(SignalPainter {
        painting,
        order: Mutex::new(Vec::new()),
    });
    let painter: Arc<dyn TilePainter> = recorder.clone();

    let tiles: Vec<Arc<Tile>> = [3, 1, 2]
        .into_iter()
        .map(|row| tile_with_texture(&context, 1, 0, row))
        .collect();
    for tile in &tiles {
        assert!(context.schedule_paint(tile, TileRole::Base, &painter).expect("schedule"));
    }
    gate.send(()).expect("open gate");
    context.drain();

    let order = recorder.order.lock().expect("paint order lock poisoned").clone();
    assert_eq!(
        order,
        vec![TileCoord::new(0, 1), TileCoord::new(0, 2), TileCoord::new(0, 3)]
    );
}

#[test]
fn cancel_group_removes_queued_requests() {
    let (context, _backend) = context(2);
    let (_blocker, gate) = block_worker(&context);
    let painter = SolidPainter::shared(1);
    let first = tile_with_texture(&context, 1, 0, 0);
    let second = tile_with_texture(&context, 1, 1, 0);
    let other = tile_with_texture(&context, 2, 0, 1);
    for tile in [&first, &second, &other] {
        assert!(context.schedule_paint(tile, TileRole::Base, &painter).expect("schedule"));
    }

    let outcome = context.cancel_group(GroupId(1), false);
    assert_eq!(
        outcome,
        CancelOutcome {
            removed: 2,
            waited: false
        }
    );
    assert!(!first.is_repaint_pending());
    assert!(!second.is_repaint_pending());
    assert!(other.is_repaint_pending());
    assert_eq!(context.cancel_group(GroupId(1), false), CancelOutcome::default());

    gate.send(()).expect("open gate");
    context.drain();
    assert_eq!(other.state(), TileState::Ready);
    assert_eq!(first.state(), TileState::Painting);
}

#[test]
fn cancel_by_painter_and_stale_scale() {
    let (context, _backend) = context(2);
    let (_blocker, gate) = block_worker(&context);
    let kept = SolidPainter::shared(1);
    let dropped = SolidPainter::shared(2);

    let moved = tile_with_texture(&context, 1, 0, 0);
    let stale = tile_with_texture(&context, 1, 1, 0);
    let foreign = tile_with_texture(&context, 1, 2, 0);
    assert!(context.schedule_paint(&moved, TileRole::Base, &kept).expect("schedule"));
    assert!(context.schedule_paint(&stale, TileRole::Base, &kept).expect("schedule"));
    assert!(context.schedule_paint(&foreign, TileRole::Base, &dropped).expect("schedule"));

    assert_eq!(context.cancel_painter(&dropped, false).removed, 1);
    assert!(!foreign.is_repaint_pending());

    assert!(moved.set_contents(TileCoord::new(0, 0), 2.0));
    assert_eq!(context.cancel_stale_scale(&kept, 2.0).removed, 1);
    assert!(!stale.is_repaint_pending());
    assert!(moved.is_repaint_pending());

    gate.send(()).expect("open gate");
    context.drain();
    assert_eq!(moved.state(), TileState::Ready);
}

#[test]
fn synchronous_cancel_unblocks_worker_waiting_for_transfer_slot() {
    let (context, _backend) = context(1);
    let painter = SolidPainter::shared(1);
    let first = painted_tile(&context, &painter, 1, 0);
    let second = painted_tile(&context, &painter, 1, 1);

    let (painting, signals) = unbounded();
    let signalling: Arc<dyn TilePainter> = Arc::new(SignalPainter {
        painting,
        order: Mutex::new(Vec::new()),
    });

    first.invalidate(IntRect::new(0, 0, 2, 2));
    assert!(context.schedule_paint(&first, TileRole::Base, &signalling).expect("schedule"));
    assert_eq!(signals.recv().expect("first painting"), first.id());

    // The only slot holds the first tile's pixels; nobody consumes them, so
    // the second write blocks inside the transfer queue.
    second.invalidate(IntRect::new(0, 0, 2, 2));
    assert!(context.schedule_paint(&second, TileRole::Base, &signalling).expect("schedule"));
    assert_eq!(signals.recv().expect("second painting"), second.id());

    let outcome = context.cancel_tile(&second, true);
    assert_eq!(
        outcome,
        CancelOutcome {
            removed: 0,
            waited: true
        }
    );
    assert!(!second.texture().expect("texture").is_busy());
    assert!(!second.is_repaint_pending());
    assert_eq!(second.dirty_bounds(), Some(IntRect::new(0, 0, 2, 2)));
    assert!(!context.transfer_queue().is_interrupted());
    assert_eq!(context.stats().transfer.interrupted, 1);

    assert_eq!(context.process_transfers().blitted, 1);
    assert_eq!(first.state(), TileState::Ready);
}

#[test]
fn waited_cancel_abandons_parked_transfers_of_matching_tiles() {
    let (context, _backend) = context(2);
    let painter = SolidPainter::shared(1);
    let parked = painted_tile(&context, &painter, 5, 0);

    parked.invalidate(IntRect::new(0, 0, 2, 2));
    assert!(context.schedule_paint(&parked, TileRole::Base, &painter).expect("schedule"));
    context.scheduler().flush();
    assert_eq!(context.transfer_queue().pending_len(), 1);
    assert!(parked.texture().expect("texture").is_busy());

    let (started_sender, started) = unbounded();
    let (gate_sender, gate) = unbounded();
    let gated: Arc<dyn TilePainter> = Arc::new(GatedPainter {
        started: started_sender,
        gate,
    });
    let running = tile_with_texture(&context, 5, 1, 0);
    assert!(context.schedule_paint(&running, TileRole::Base, &gated).expect("schedule"));
    assert_eq!(started.recv().expect("running started"), running.id());
    assert!(context.schedule_paint(&parked, TileRole::Base, &painter).expect("requeue"));

    let opener = {
        let transfer = Arc::clone(context.transfer_queue());
        std::thread::spawn(move || {
            while !transfer.is_interrupted() {
                std::thread::yield_now();
            }
            gate_sender.send(()).expect("open gate");
        })
    };
    let outcome = context.cancel_group(GroupId(5), true);
    opener.join().expect("join opener");

    assert_eq!(
        outcome,
        CancelOutcome {
            removed: 1,
            waited: true
        }
    );
    assert!(!context.transfer_queue().has_pending());
    assert!(!parked.texture().expect("texture").is_busy());
    assert!(!running.texture().expect("texture").is_busy());
    assert_eq!(parked.dirty_bounds(), Some(IntRect::new(0, 0, 2, 2)));
    assert_eq!(context.stats().transfer.discarded, 1);

    context.drain();
    assert!(context.schedule_paint(&parked, TileRole::Base, &painter).expect("reschedule"));
    context.drain();
    assert_eq!(parked.state(), TileState::Ready);
}

#[test]
fn shutdown_releases_worker_blocked_on_transfer() {
    let (context, _backend) = context(1);
    let painter = SolidPainter::shared(1);
    let first = painted_tile(&context, &painter, 1, 0);
    let second = painted_tile(&context, &painter, 1, 1);

    let (painting, signals) = unbounded();
    let signalling: Arc<dyn TilePainter> = Arc::new(SignalPainter {
        painting,
        order: Mutex::new(Vec::new()),
    });
    for tile in [&first, &second] {
        tile.invalidate(IntRect::new(0, 0, 2, 2));
        assert!(context.schedule_paint(tile, TileRole::Base, &signalling).expect("schedule"));
        assert_eq!(signals.recv().expect("painting"), tile.id());
    }

    context.shutdown();

    assert!(!first.texture().expect("texture").is_busy());
    assert!(!second.texture().expect("texture").is_busy());
    assert!(first.needs_full_repaint());
    assert_eq!(context.stats().transfer.discarded, 1);
    assert!(matches!(
        context.schedule_paint(&first, TileRole::Base, &painter),
        Err(MosaicError::Scheduler(SchedulerError::ShutDown))
    ));
    assert!(!first.is_repaint_pending());
}

#[test]
fn trim_gpu_memory_spares_most_recently_drawn_tiles() {
    let (context, backend) = context(2);
    let painter = SolidPainter::shared(1);
    let recent = painted_tile(&context, &painter, 1, 0);
    let idle = painted_tile(&context, &painter, 1, 1);

    context.begin_frame();
    context.mark_tile_drawn(&recent);
    assert_eq!(backend.image_count(), 2);

    assert_eq!(context.trim_gpu_memory(true), 1);
    assert_eq!(backend.image_count(), 1);
    assert!(context.draw_binding(&recent).is_some());
    assert!(context.draw_binding(&idle).is_none());
    assert!(idle.needs_full_repaint());

    assert_eq!(context.trim_gpu_memory(false), 1);
    assert_eq!(backend.image_count(), 0);
}

#[test]
fn released_tile_returns_texture_to_pool() {
    let (context, _backend) = context(2);
    let painter = SolidPainter::shared(1);
    let tile = painted_tile(&context, &painter, 1, 0);
    assert_eq!(context.stats().pool.owned, 1);

    let texture = context.release_tile(&tile).expect("texture");
    assert_eq!(texture.owner_id(), None);
    assert_eq!(tile.state(), TileState::Unpainted);
    assert_eq!(context.stats().pool.owned, 0);
}

#[test]
fn backend_limit_clamps_pool_cap() {
    init_logging();
    let backend: Arc<dyn TextureBackend> = Arc::new(MemoryTextureBackend::with_max_textures(3));
    let context = TileContext::new(config(1), backend).expect("TileContext::new");
    assert_eq!(context.pool().hard_cap(), 3);
    assert_eq!(context.grow_to(10), 3);
}

#[test]
fn invalid_config_is_rejected() {
    let backend: Arc<dyn TextureBackend> = Arc::new(MemoryTextureBackend::new());
    let result = TileContext::new(config(0), backend);
    assert!(matches!(
        result,
        Err(MosaicError::Config(ConfigError::ZeroTransferSlots))
    ));
}
