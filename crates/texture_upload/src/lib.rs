use std::fmt;
use std::sync::Arc;

use log::debug;
use render_protocol::{IntRect, PaintedBitmap, PixelFormat, TextureId};
use serde::{Deserialize, Serialize};
use tiles::{CommitOutcome, WriteTicket};

mod backend;
mod pixels;
mod transfer;
#[cfg(feature = "gpu")]
mod wgpu_backend;

pub use backend::{MemoryTextureBackend, TextureBackend};
pub use pixels::{UploadFormat, rgb565_to_rgba8, rgba4444_to_rgba8, upload_bytes};
pub use transfer::{
    DEFAULT_TRANSFER_SLOTS, TransferQueue, TransferQueueConfig, TransferReport, TransferStats,
};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{WgpuTextureBackend, texture_format};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    EmptyBitmap,
    MissingImage(TextureId),
    FormatMismatch {
        texture: TextureId,
        image: PixelFormat,
        bitmap: PixelFormat,
    },
    RegionOutOfBounds {
        texture: TextureId,
        rect: IntRect,
    },
    Interrupted,
    ZeroTransferSlots,
}

impl fmt::Display for UploadError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::SizeMismatch { expected, actual } => write!(
                formatter,
                "painted bitmap is {}x{}, expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            UploadError::EmptyBitmap => write!(formatter, "painted bitmap is empty"),
            UploadError::MissingImage(texture) => {
                write!(formatter, "texture {texture:?} has no image to update")
            }
            UploadError::FormatMismatch {
                texture,
                image,
                bitmap,
            } => write!(
                formatter,
                "texture {texture:?} holds {image:?} pixels, bitmap is {bitmap:?}"
            ),
            UploadError::RegionOutOfBounds { texture, rect } => {
                write!(formatter, "region {rect:?} lies outside texture {texture:?}")
            }
            UploadError::Interrupted => write!(formatter, "texture transfer was interrupted"),
            UploadError::ZeroTransferSlots => {
                write!(formatter, "transfer queue needs at least one slot")
            }
        }
    }
}

impl std::error::Error for UploadError {}

/// What the platform allows for moving pixels to the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadCapabilities {
    pub shared_buffer_path: bool,
}

impl Default for UploadCapabilities {
    fn default() -> Self {
        Self {
            shared_buffer_path: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Replace or update the image right away on the calling thread.
    Direct,
    /// Hand the pixels to the transfer queue for the GPU-owning thread.
    Transfer,
}

/// Transfer only when a shared path exists and the texture already holds an
/// image of the same size and upload format; anything else needs a direct
/// (re)allocation.
pub fn select_strategy(
    capabilities: UploadCapabilities,
    ticket: &WriteTicket,
    bitmap: &PaintedBitmap,
) -> UploadStrategy {
    if !capabilities.shared_buffer_path {
        return UploadStrategy::Direct;
    }
    let texture = ticket.texture();
    let same_image = texture.image().is_some_and(|image| {
        image.width == texture.width()
            && image.height == texture.height()
            && UploadFormat::for_pixels(image.format)
                == UploadFormat::for_pixels(bitmap.pixel_format())
    });
    if same_image {
        UploadStrategy::Transfer
    } else {
        UploadStrategy::Direct
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Committed(CommitOutcome),
    Queued,
    Obsolete,
}

/// Moves painted pixels into pooled textures, choosing a strategy per write.
#[derive(Clone)]
pub struct Uploader {
    backend: Arc<dyn TextureBackend>,
    transfer: Option<Arc<TransferQueue>>,
    capabilities: UploadCapabilities,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Uploader")
            .field("transfer", &self.transfer)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    pub fn new(
        backend: Arc<dyn TextureBackend>,
        transfer: Option<Arc<TransferQueue>>,
        capabilities: UploadCapabilities,
    ) -> Self {
        let capabilities = UploadCapabilities {
            shared_buffer_path: capabilities.shared_buffer_path && transfer.is_some(),
        };
        Self {
            backend,
            transfer,
            capabilities,
        }
    }

    pub fn backend(&self) -> &Arc<dyn TextureBackend> {
        &self.backend
    }

    pub fn transfer_queue(&self) -> Option<&Arc<TransferQueue>> {
        self.transfer.as_ref()
    }

    pub fn capabilities(&self) -> UploadCapabilities {
        self.capabilities
    }

    /// Writes `bitmap` (sized to the ticket's region) into the ticket's texture.
    /// On error the ticket is abandoned and the tile keeps its dirty state.
    pub fn upload(
        &self,
        ticket: WriteTicket,
        bitmap: &PaintedBitmap,
    ) -> Result<UploadOutcome, UploadError> {
        let region = ticket.region();
        if bitmap.width() != region.width || bitmap.height() != region.height {
            return Err(UploadError::SizeMismatch {
                expected: (region.width, region.height),
                actual: (bitmap.width(), bitmap.height()),
            });
        }
        if ticket.is_obsolete() {
            debug!(
                "skipping upload for tile {:?}: texture {:?} changed hands",
                ticket.tile_id(),
                ticket.texture_id()
            );
            ticket.abandon();
            return Ok(UploadOutcome::Obsolete);
        }

        match (select_strategy(self.capabilities, &ticket, bitmap), &self.transfer) {
            (UploadStrategy::Transfer, Some(transfer)) => {
                transfer.enqueue(ticket, bitmap)?;
                Ok(UploadOutcome::Queued)
            }
            _ => self.upload_direct(ticket, bitmap),
        }
    }

    fn upload_direct(
        &self,
        ticket: WriteTicket,
        bitmap: &PaintedBitmap,
    ) -> Result<UploadOutcome, UploadError> {
        let texture = ticket.texture_id();
        let result = if ticket.is_full() {
            self.backend.replace_image(texture, bitmap)
        } else {
            let region = ticket.region();
            self.backend.update_region(texture, region.x, region.y, bitmap)
        };
        match result {
            Ok(image) => Ok(UploadOutcome::Committed(ticket.commit(image))),
            Err(error) => {
                ticket.abandon_full();
                Err(error)
            }
        }
    }
}

static_assertions::assert_impl_all!(TransferQueue: Send, Sync);
static_assertions::assert_impl_all!(Uploader: Send, Sync);
static_assertions::assert_impl_all!(MemoryTextureBackend: Send, Sync);
