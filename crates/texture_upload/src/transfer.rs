use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use crossbeam_queue::ArrayQueue;
use log::{debug, warn};
use render_protocol::{CancelListener, PaintedBitmap};
use serde::{Deserialize, Serialize};
use tiles::WriteTicket;

use crate::UploadError;
use crate::backend::TextureBackend;

pub const DEFAULT_TRANSFER_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferQueueConfig {
    pub slot_count: usize,
}

impl Default for TransferQueueConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_TRANSFER_SLOTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    pub blitted: usize,
    pub obsolete: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub enqueued: u64,
    pub blitted: u64,
    pub obsolete: u64,
    pub failed: u64,
    pub discarded: u64,
    pub interrupted: u64,
}

struct TransferItem {
    ticket: WriteTicket,
    bitmap: PaintedBitmap,
}

/// Fixed set of reusable pixel slots between the paint worker (producer) and
/// the GPU-owning thread (consumer). The producer blocks while every slot is
/// in flight; an interrupt makes it give up instead.
pub struct TransferQueue {
    slot_count: usize,
    free: ArrayQueue<Vec<u8>>,
    pending: ArrayQueue<TransferItem>,
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
    ready_sender: Sender<()>,
    ready_receiver: Receiver<()>,
    interrupted: AtomicBool,
    enqueued: AtomicU64,
    blitted: AtomicU64,
    obsolete: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    interrupted_writes: AtomicU64,
}

impl std::fmt::Debug for TransferQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransferQueue")
            .field("slot_count", &self.slot_count)
            .field("pending", &self.pending.len())
            .field("free", &self.free.len())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl TransferQueue {
    pub fn new(config: TransferQueueConfig) -> Result<Self, UploadError> {
        if config.slot_count == 0 {
            return Err(UploadError::ZeroTransferSlots);
        }
        let free = ArrayQueue::new(config.slot_count);
        for _ in 0..config.slot_count {
            if free.push(Vec::new()).is_err() {
                panic!("transfer slot ring smaller than slot count");
            }
        }
        let (wake_sender, wake_receiver) = bounded(1);
        let (ready_sender, ready_receiver) = bounded(1);
        Ok(Self {
            slot_count: config.slot_count,
            free,
            pending: ArrayQueue::new(config.slot_count),
            wake_sender,
            wake_receiver,
            ready_sender,
            ready_receiver,
            interrupted: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            blitted: AtomicU64::new(0),
            obsolete: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            interrupted_writes: AtomicU64::new(0),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn wake(&self) {
        signal(&self.wake_sender);
    }

    /// Wakes a consumer blocked in [`TransferQueue::wait_ready`]. Producers
    /// call it after queueing; the paint side also calls it when a request
    /// finishes without queueing anything.
    pub fn notify_ready(&self) {
        signal(&self.ready_sender);
    }

    /// Consumer side: blocks until the next [`TransferQueue::notify_ready`].
    /// A notification sent since the last wait returns at once.
    pub fn wait_ready(&self) {
        if self.ready_receiver.recv().is_err() {
            panic!("transfer queue ready channel disconnected");
        }
    }

    /// While set, producers stop waiting for slots and fail with
    /// [`UploadError::Interrupted`], abandoning their write.
    pub fn interrupt(&self, interrupted: bool) {
        self.interrupted.store(interrupted, Ordering::Release);
        if interrupted {
            self.wake();
        }
    }

    /// Copies `bitmap` into a free slot and queues it for the consumer. Blocks
    /// until a slot is free or the queue is interrupted.
    pub fn enqueue(&self, ticket: WriteTicket, bitmap: &PaintedBitmap) -> Result<(), UploadError> {
        let buffer = loop {
            if self.is_interrupted() {
                self.interrupted_writes.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "transfer of tile {:?} interrupted while waiting for a slot",
                    ticket.tile_id()
                );
                return Err(UploadError::Interrupted);
            }
            if let Some(buffer) = self.free.pop() {
                break buffer;
            }
            if self.wake_receiver.recv().is_err() {
                panic!("transfer queue wake channel disconnected");
            }
        };
        let item = TransferItem {
            ticket,
            bitmap: bitmap.copy_into(buffer),
        };
        if self.pending.push(item).is_err() {
            panic!("transfer queue holds more items than slots");
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify_ready();
        Ok(())
    }

    fn recycle(&self, buffer: Vec<u8>) {
        if self.free.push(buffer).is_err() {
            panic!("transfer queue recycled more slots than it owns");
        }
        self.wake();
    }

    /// Consumer side: uploads every pending item that is still current and
    /// commits it. Must run where the backend may touch the GPU.
    pub fn process_pending(&self, backend: &dyn TextureBackend) -> TransferReport {
        let mut report = TransferReport::default();
        while let Some(TransferItem { ticket, bitmap }) = self.pending.pop() {
            if ticket.is_obsolete() {
                debug!(
                    "dropping obsolete transfer for tile {:?} into texture {:?}",
                    ticket.tile_id(),
                    ticket.texture_id()
                );
                ticket.abandon();
                report.obsolete += 1;
            } else {
                let region = ticket.region();
                match backend.update_region(ticket.texture_id(), region.x, region.y, &bitmap) {
                    Ok(image) => {
                        ticket.commit(image);
                        report.blitted += 1;
                    }
                    Err(error) => {
                        warn!(
                            "transfer into texture {:?} failed: {error}",
                            ticket.texture_id()
                        );
                        ticket.abandon_full();
                        report.failed += 1;
                    }
                }
            }
            self.recycle(bitmap.into_pixels());
        }
        self.blitted
            .fetch_add(report.blitted as u64, Ordering::Relaxed);
        self.obsolete
            .fetch_add(report.obsolete as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    /// Drops everything pending without uploading, for when the GPU context is
    /// gone. Slots return to the producer immediately.
    pub fn discard_queue(&self) -> usize {
        let mut discarded = 0;
        while let Some(TransferItem { ticket, bitmap }) = self.pending.pop() {
            ticket.abandon_full();
            self.recycle(bitmap.into_pixels());
            discarded += 1;
        }
        if discarded > 0 {
            warn!("discarded {discarded} pending texture transfers");
        }
        self.discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }

    /// Abandons pending items whose ticket matches `predicate`; the rest stay
    /// queued in order. The tile keeps its dirty region for the next paint.
    pub fn discard_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&WriteTicket) -> bool,
    {
        let mut kept = Vec::with_capacity(self.pending.len());
        let mut discarded = 0;
        while let Some(item) = self.pending.pop() {
            if predicate(&item.ticket) {
                let TransferItem { ticket, bitmap } = item;
                debug!(
                    "discarding pending transfer for tile {:?} into texture {:?}",
                    ticket.tile_id(),
                    ticket.texture_id()
                );
                ticket.abandon();
                self.recycle(bitmap.into_pixels());
                discarded += 1;
            } else {
                kept.push(item);
            }
        }
        for item in kept {
            if self.pending.push(item).is_err() {
                panic!("transfer queue holds more items than slots");
            }
        }
        self.discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            blitted: self.blitted.load(Ordering::Relaxed),
            obsolete: self.obsolete.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            interrupted: self.interrupted_writes.load(Ordering::Relaxed),
        }
    }
}

fn signal(sender: &Sender<()>) {
    match sender.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => panic!("transfer queue signal channel disconnected"),
    }
}

impl CancelListener for TransferQueue {
    fn cancel_wait_started(&self) {
        self.interrupt(true);
    }

    fn cancel_wait_finished(&self) {
        self.interrupt(false);
    }
}

impl Drop for TransferQueue {
    fn drop(&mut self) {
        let _ = self.discard_queue();
    }
}
