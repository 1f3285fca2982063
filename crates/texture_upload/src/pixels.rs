use std::borrow::Cow;

use render_protocol::{IntRect, PaintedBitmap, PixelFormat};

/// Formats a backend can allocate directly. Packed 16-bit sources are widened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    R8,
    Rgba8,
}

impl UploadFormat {
    pub const fn for_pixels(format: PixelFormat) -> Self {
        match format {
            PixelFormat::R8 => UploadFormat::R8,
            PixelFormat::Packed565 | PixelFormat::Packed4444 | PixelFormat::Rgba8 => {
                UploadFormat::Rgba8
            }
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            UploadFormat::R8 => 1,
            UploadFormat::Rgba8 => 4,
        }
    }
}

/// Bitmap bytes laid out for `UploadFormat::for_pixels(bitmap.pixel_format())`.
pub fn upload_bytes(bitmap: &PaintedBitmap) -> Cow<'_, [u8]> {
    match bitmap.pixel_format() {
        PixelFormat::R8 | PixelFormat::Rgba8 => Cow::Borrowed(bitmap.pixels()),
        PixelFormat::Packed565 => Cow::Owned(expand_packed(bitmap.pixels(), rgb565_to_rgba8)),
        PixelFormat::Packed4444 => Cow::Owned(expand_packed(bitmap.pixels(), rgba4444_to_rgba8)),
    }
}

fn expand_packed(source: &[u8], convert: fn(u16) -> [u8; 4]) -> Vec<u8> {
    let mut expanded = Vec::with_capacity(source.len() * 2);
    for texel in source.chunks_exact(2) {
        expanded.extend_from_slice(&convert(u16::from_le_bytes([texel[0], texel[1]])));
    }
    expanded
}

pub fn rgb565_to_rgba8(texel: u16) -> [u8; 4] {
    let red = ((texel >> 11) & 0x1f) as u32;
    let green = ((texel >> 5) & 0x3f) as u32;
    let blue = (texel & 0x1f) as u32;
    [
        (red * 255 / 31) as u8,
        (green * 255 / 63) as u8,
        (blue * 255 / 31) as u8,
        0xff,
    ]
}

pub fn rgba4444_to_rgba8(texel: u16) -> [u8; 4] {
    let nibble = |shift: u16| (((texel >> shift) & 0xf) as u8) * 17;
    [nibble(12), nibble(8), nibble(4), nibble(0)]
}

/// Copies `source` into `target` at `(x, y)`; both tightly packed rows.
pub fn blit_rows(
    target: &mut [u8],
    target_width: u32,
    source: &[u8],
    rect: IntRect,
    bytes_per_pixel: u32,
) {
    let target_stride = (target_width * bytes_per_pixel) as usize;
    let row_len = (rect.width * bytes_per_pixel) as usize;
    for row in 0..rect.height as usize {
        let target_start =
            (rect.y as usize + row) * target_stride + (rect.x * bytes_per_pixel) as usize;
        let source_start = row * row_len;
        target[target_start..target_start + row_len]
            .copy_from_slice(&source[source_start..source_start + row_len]);
    }
}

#[cfg(test)]
mod tests {
    use render_protocol::BitmapConfig;

    use super::*;

    #[test]
    fn packed_formats_widen_to_rgba8() {
        assert_eq!(UploadFormat::for_pixels(PixelFormat::R8), UploadFormat::R8);
        assert_eq!(UploadFormat::for_pixels(PixelFormat::Packed565), UploadFormat::Rgba8);
        assert_eq!(rgb565_to_rgba8(0xffff), [255, 255, 255, 255]);
        assert_eq!(rgb565_to_rgba8(0xf800), [255, 0, 0, 255]);
        assert_eq!(rgb565_to_rgba8(0x07e0), [0, 255, 0, 255]);
        assert_eq!(rgba4444_to_rgba8(0x0f0f), [0, 255, 0, 255]);
    }

    #[test]
    fn upload_bytes_borrow_native_formats() {
        let bitmap = PaintedBitmap::filled(2, 2, BitmapConfig::Alpha8, 9).expect("bitmap");
        assert!(matches!(upload_bytes(&bitmap), Cow::Borrowed(_)));

        let packed = PaintedBitmap::filled(2, 1, BitmapConfig::Rgb565, 0xff).expect("bitmap");
        let bytes = upload_bytes(&packed);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn blit_rows_writes_sub_rectangle() {
        let mut target = vec![0u8; 4 * 3];
        blit_rows(&mut target, 4, &[1, 2, 3, 4], IntRect::new(1, 1, 2, 2), 1);
        assert_eq!(target, vec![0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0]);
    }
}
