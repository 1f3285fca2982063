use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, error};
use render_protocol::{IntRect, PaintedBitmap, TextureId};
use tiles::ImageDims;

use crate::UploadError;
use crate::backend::{TextureBackend, check_region};
use crate::pixels::{UploadFormat, upload_bytes};

pub fn texture_format(format: UploadFormat) -> wgpu::TextureFormat {
    match format {
        UploadFormat::R8 => wgpu::TextureFormat::R8Unorm,
        UploadFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

#[derive(Debug)]
struct GpuImage {
    texture: wgpu::Texture,
    dims: ImageDims,
    format: UploadFormat,
}

/// Tile images as individual `wgpu` textures. Allocation and writes run inside an
/// out-of-memory error scope; a reported error aborts the process.
#[derive(Debug)]
pub struct WgpuTextureBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    images: Mutex<HashMap<TextureId, GpuImage>>,
    max_textures: Option<u32>,
}

impl WgpuTextureBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            images: Mutex::new(HashMap::new()),
            max_textures: None,
        }
    }

    pub fn with_max_textures(mut self, max_textures: u32) -> Self {
        self.max_textures = Some(max_textures);
        self
    }

    fn images(&self) -> MutexGuard<'_, HashMap<TextureId, GpuImage>> {
        self.images.lock().expect("wgpu backend images lock poisoned")
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Runs `visit` with the texture backing `texture`, if it has an image.
    pub fn with_texture<R>(
        &self,
        texture: TextureId,
        visit: impl FnOnce(&wgpu::Texture, ImageDims) -> R,
    ) -> Option<R> {
        let images = self.images();
        let image = images.get(&texture)?;
        Some(visit(&image.texture, image.dims))
    }

    pub fn image_count(&self) -> usize {
        self.images().len()
    }

    fn write(&self, texture: &wgpu::Texture, rect: IntRect, format: UploadFormat, bytes: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rect.width * format.bytes_per_pixel()),
                rows_per_image: Some(rect.height),
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn guard_out_of_memory<R>(&self, context: &str, work: impl FnOnce() -> R) -> R {
        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let result = work();
        if let Some(gpu_error) = pollster::block_on(error_scope.pop()) {
            error!("gpu out of memory while {context}: {gpu_error}");
            std::process::abort();
        }
        result
    }
}

impl TextureBackend for WgpuTextureBackend {
    fn max_texture_count(&self) -> Option<u32> {
        self.max_textures
    }

    fn replace_image(
        &self,
        texture: TextureId,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError> {
        if bitmap.is_empty() {
            return Err(UploadError::EmptyBitmap);
        }
        let format = UploadFormat::for_pixels(bitmap.pixel_format());
        let dims = ImageDims {
            width: bitmap.width(),
            height: bitmap.height(),
            format: bitmap.pixel_format(),
        };
        let bytes = upload_bytes(bitmap);
        let gpu_texture = self.guard_out_of_memory("allocating a tile texture", || {
            let gpu_texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("texture_upload.tile"),
                size: wgpu::Extent3d {
                    width: dims.width,
                    height: dims.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(format),
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            self.write(
                &gpu_texture,
                IntRect::from_size(dims.width, dims.height),
                format,
                &bytes,
            );
            gpu_texture
        });

        let previous = self.images().insert(
            texture,
            GpuImage {
                texture: gpu_texture,
                dims,
                format,
            },
        );
        if let Some(previous) = previous {
            debug!(
                "texture {texture:?} image replaced ({}x{} -> {}x{})",
                previous.dims.width, previous.dims.height, dims.width, dims.height
            );
            previous.texture.destroy();
        }
        Ok(dims)
    }

    fn update_region(
        &self,
        texture: TextureId,
        x: u32,
        y: u32,
        bitmap: &PaintedBitmap,
    ) -> Result<ImageDims, UploadError> {
        if bitmap.is_empty() {
            return Err(UploadError::EmptyBitmap);
        }
        let images = self.images();
        let image = images
            .get(&texture)
            .ok_or(UploadError::MissingImage(texture))?;
        let rect = check_region(texture, image.dims, x, y, bitmap)?;
        let bytes = upload_bytes(bitmap);
        self.guard_out_of_memory("updating a tile texture", || {
            self.write(&image.texture, rect, image.format, &bytes);
        });
        Ok(image.dims)
    }

    fn discard_image(&self, texture: TextureId) {
        if let Some(image) = self.images().remove(&texture) {
            image.texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use render_protocol::BitmapConfig;

    use super::*;

    /// `None` on machines without any usable adapter.
    fn create_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("texture_upload tests"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .ok()
        })
    }

    #[test]
    fn replace_update_and_discard_tile_images() {
        let Some((device, queue)) = create_device_queue() else {
            eprintln!("skipping: no wgpu adapter available");
            return;
        };
        let backend = WgpuTextureBackend::new(device, queue);
        let texture = TextureId(0);

        let full = PaintedBitmap::filled(16, 16, BitmapConfig::Rgb565, 0xff).expect("bitmap");
        let dims = backend.replace_image(texture, &full).expect("replace");
        assert_eq!((dims.width, dims.height), (16, 16));
        assert_eq!(backend.image_count(), 1);
        let format = backend.with_texture(texture, |gpu_texture, _| gpu_texture.format());
        assert_eq!(format, Some(wgpu::TextureFormat::Rgba8Unorm));

        let patch = PaintedBitmap::filled(4, 4, BitmapConfig::Argb8888, 0x10).expect("bitmap");
        assert!(backend.update_region(texture, 12, 12, &patch).is_ok());
        assert_eq!(
            backend.update_region(texture, 14, 0, &patch),
            Err(UploadError::RegionOutOfBounds {
                texture,
                rect: IntRect::new(14, 0, 4, 4)
            })
        );
        let alpha = PaintedBitmap::filled(4, 4, BitmapConfig::Alpha8, 0).expect("bitmap");
        assert!(matches!(
            backend.update_region(texture, 0, 0, &alpha),
            Err(UploadError::FormatMismatch { .. })
        ));

        backend.discard_image(texture);
        assert_eq!(backend.image_count(), 0);
        assert_eq!(
            backend.update_region(texture, 0, 0, &patch),
            Err(UploadError::MissingImage(texture))
        );
    }
}
