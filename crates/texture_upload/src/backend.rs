use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use render_protocol::{IntRect, PaintedBitmap, TextureId};
use tiles::ImageDims;

use crate::UploadError;
use crate::pixels::{UploadFormat, blit_rows, upload_bytes};

/// GPU-side operations the uploader needs. Implementations must be callable
/// from the paint worker and from the transfer consumer.
pub trait TextureBackend: Send + Sync {
    /// Platform limit on simultaneously allocated textures, if any.
    fn max_texture_count(&self) -> Option<u32> {
        None
    }

    /// Allocates (or reallocates) the image for `texture` and fills it.
    fn replace_image(
        &self,
        texture: TextureId,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError>;

    /// Writes `bitmap` into the existing image at `(x, y)`.
    fn update_region(
        &self,
        texture: TextureId,
        x: u32,
        y: u32,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError>;

    fn discard_image(&self, texture: TextureId);
}

pub(crate) fn check_region(
    texture: TextureId,
    image: ImageDims,
    x: u32,
    y: u32,
    bitmap: &PaintedBitmap,
) -> Result<IntRect, UploadError> {
    if UploadFormat::for_pixels(image.format) != UploadFormat::for_pixels(bitmap.pixel_format()) {
        return Err(UploadError::FormatMismatch {
            texture,
            image: image.format,
            bitmap: bitmap.pixel_format(),
        });
    }
    let rect = IntRect::new(x, y, bitmap.width(), bitmap.height());
    if !IntRect::from_size(image.width, image.height).contains_rect(&rect) {
        return Err(UploadError::RegionOutOfBounds { texture, rect });
    }
    Ok(rect)
}

#[derive(Debug, Clone)]
struct MemoryImage {
    dims: ImageDims,
    format: UploadFormat,
    bytes: Vec<u8>,
}

/// CPU-resident backend. Images are stored in their upload format, so packed
/// sources are kept widened exactly as a GPU would receive them.
#[derive(Debug, Default)]
pub struct MemoryTextureBackend {
    images: Mutex<HashMap<TextureId, MemoryImage>>,
    max_textures: Option<u32>,
    replaces: AtomicU64,
    updates: AtomicU64,
    discards: AtomicU64,
}

impl MemoryTextureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_textures(max_textures: u32) -> Self {
        Self {
            max_textures: Some(max_textures),
            ..Self::default()
        }
    }

    fn images(&self) -> std::sync::MutexGuard<'_, HashMap<TextureId, MemoryImage>> {
        self.images.lock().expect("memory backend images lock poisoned")
    }

    pub fn image(&self, texture: TextureId) -> Option<ImageDims> {
        self.images().get(&texture).map(|image| image.dims)
    }

    /// Uploaded bytes in upload format (R8 or RGBA8).
    pub fn bytes(&self, texture: TextureId) -> Option<Vec<u8>> {
        self.images().get(&texture).map(|image| image.bytes.clone())
    }

    pub fn image_count(&self) -> usize {
        self.images().len()
    }

    pub fn replace_count(&self) -> u64 {
        self.replaces.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn discard_count(&self) -> u64 {
        self.discards.load(Ordering::Relaxed)
    }
}

impl TextureBackend for MemoryTextureBackend {
    fn max_texture_count(&self) -> Option<u32> {
        self.max_textures
    }

    fn replace_image(
        &self,
        texture: TextureId,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError> {
        let dims = ImageDims {
            width: bitmap.width(),
            height: bitmap.height(),
            format: bitmap.pixel_format(),
        };
        let image = MemoryImage {
            dims,
            format: UploadFormat::for_pixels(dims.format),
            bytes: upload_bytes(bitmap).into_owned(),
        };
        self.images().insert(texture, image);
        self.replaces.fetch_add(1, Ordering::Relaxed);
        Ok(dims)
    }

    fn update_region(
        &self,
        texture: TextureId,
        x: u32,
        y: u32,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError> {
        let mut images = self.images();
        let image = images
            .get_mut(&texture)
            .ok_or(UploadError::MissingImage(texture))?;
        let rect = check_region(texture, image.dims, x, y, bitmap)?;
        blit_rows(
            &mut image.bytes,
            image.dims.width,
            &upload_bytes(bitmap),
            rect,
            image.format.bytes_per_pixel(),
        );
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(image.dims)
    }

    fn discard_image(&self, texture: TextureId) {
        if self.images().remove(&texture).is_some() {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }
}
