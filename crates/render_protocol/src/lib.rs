use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u64);

static NEXT_TILE_ID: AtomicU64 = AtomicU64::new(1);

impl TileId {
    pub fn next() -> Self {
        Self(NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub column: i32,
    pub row: i32,
}

impl TileCoord {
    pub const fn new(column: i32, row: i32) -> Self {
        Self { column, row }
    }
}

/// Integer rectangle in tile-local pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl IntRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn union(&self, other: &IntRect) -> IntRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        IntRect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    pub fn intersect(&self, other: &IntRect) -> Option<IntRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(IntRect::new(x, y, right - x, bottom - y))
    }

    pub fn contains_rect(&self, other: &IntRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Union of invalidated rectangles, kept as a list rather than a true region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRegion {
    rects: Vec<IntRect>,
}

impl DirtyRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: IntRect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn add(&mut self, rect: IntRect) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|existing| existing.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|existing| !rect.contains_rect(existing));
        self.rects.push(rect);
    }

    pub fn union_with(&mut self, other: &DirtyRegion) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn bounds(&self) -> Option<IntRect> {
        let mut rects = self.rects.iter();
        let first = *rects.next()?;
        Some(rects.fold(first, |bounds, rect| bounds.union(rect)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntRect> + '_ {
        self.rects.iter()
    }
}

/// Pixel layout of a bitmap produced by a painter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitmapConfig {
    Alpha8,
    Rgb565,
    Argb4444,
    Argb8888,
}

/// Texture-side pixel format a bitmap config maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    R8,
    Packed565,
    Packed4444,
    Rgba8,
}

impl BitmapConfig {
    pub const fn pixel_format(self) -> PixelFormat {
        match self {
            BitmapConfig::Alpha8 => PixelFormat::R8,
            BitmapConfig::Rgb565 => PixelFormat::Packed565,
            BitmapConfig::Argb4444 => PixelFormat::Packed4444,
            BitmapConfig::Argb8888 => PixelFormat::Rgba8,
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        self.pixel_format().bytes_per_pixel()
    }
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Packed565 | PixelFormat::Packed4444 => 2,
            PixelFormat::Rgba8 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapError {
    SizeOverflow,
    BufferLengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for BitmapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitmapError::SizeOverflow => write!(formatter, "bitmap byte size overflows usize"),
            BitmapError::BufferLengthMismatch { expected, actual } => write!(
                formatter,
                "bitmap pixel buffer has {actual} bytes, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for BitmapError {}

/// CPU pixel buffer produced by a painter, tightly packed rows.
#[derive(Clone, PartialEq, Eq)]
pub struct PaintedBitmap {
    width: u32,
    height: u32,
    config: BitmapConfig,
    pixels: Vec<u8>,
}

impl fmt::Debug for PaintedBitmap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PaintedBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("config", &self.config)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl PaintedBitmap {
    pub fn new(
        width: u32,
        height: u32,
        config: BitmapConfig,
        pixels: Vec<u8>,
    ) -> Result<Self, BitmapError> {
        let expected = Self::byte_len(width, height, config)?;
        if pixels.len() != expected {
            return Err(BitmapError::BufferLengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            config,
            pixels,
        })
    }

    pub fn filled(
        width: u32,
        height: u32,
        config: BitmapConfig,
        value: u8,
    ) -> Result<Self, BitmapError> {
        let len = Self::byte_len(width, height, config)?;
        Self::new(width, height, config, vec![value; len])
    }

    pub fn byte_len(width: u32, height: u32, config: BitmapConfig) -> Result<usize, BitmapError> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(config.bytes_per_pixel() as usize))
            .ok_or(BitmapError::SizeOverflow)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn config(&self) -> BitmapConfig {
        self.config
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.config.pixel_format()
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.config.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Copies this bitmap into `buffer`, reusing its allocation.
    pub fn copy_into(&self, mut buffer: Vec<u8>) -> PaintedBitmap {
        buffer.clear();
        buffer.extend_from_slice(&self.pixels);
        PaintedBitmap {
            width: self.width,
            height: self.height,
            config: self.config,
            pixels: buffer,
        }
    }
}

/// What a painter is asked to produce for one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaintTarget {
    pub tile_id: TileId,
    pub group: GroupId,
    pub coord: TileCoord,
    pub scale: f32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Tile-local rectangle to repaint; the returned bitmap must have its size.
    pub region: IntRect,
    pub full_repaint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaintError {
    ContentUnavailable,
    Aborted,
    Failed { reason: String },
}

impl fmt::Display for PaintError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaintError::ContentUnavailable => write!(formatter, "tile content is unavailable"),
            PaintError::Aborted => write!(formatter, "painter aborted the request"),
            PaintError::Failed { reason } => write!(formatter, "painter failed: {reason}"),
        }
    }
}

impl std::error::Error for PaintError {}

/// Produces CPU pixels for a tile region. Invoked on the paint worker thread; must not
/// block on the drawing thread.
pub trait TilePainter: Send + Sync {
    fn paint(&self, target: &PaintTarget) -> Result<PaintedBitmap, PaintError>;
}

/// Receives both halves of the synchronous cancellation handshake so a subsystem that
/// may block the paint worker can release it while the caller waits.
pub trait CancelListener: Send + Sync {
    fn cancel_wait_started(&self);
    fn cancel_wait_finished(&self);
}

static_assertions::assert_impl_all!(PaintedBitmap: Send, Sync);
static_assertions::assert_obj_safe!(TilePainter, CancelListener);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_region_bounds_cover_all_rects() {
        let mut region = DirtyRegion::new();
        region.add(IntRect::new(10, 10, 5, 5));
        region.add(IntRect::new(40, 2, 8, 4));

        assert_eq!(region.bounds(), Some(IntRect::new(10, 2, 38, 13)));
    }

    #[test]
    fn dirty_region_drops_contained_rects() {
        let mut region = DirtyRegion::new();
        region.add(IntRect::new(4, 4, 2, 2));
        region.add(IntRect::new(0, 0, 16, 16));
        region.add(IntRect::new(1, 1, 3, 3));

        assert_eq!(region.iter().count(), 1);
        assert_eq!(region.bounds(), Some(IntRect::from_size(16, 16)));
    }

    #[test]
    fn empty_rects_are_ignored() {
        let mut region = DirtyRegion::new();
        region.add(IntRect::new(3, 3, 0, 10));
        assert!(region.is_empty());
        assert_eq!(region.bounds(), None);
    }

    #[test]
    fn intersect_returns_none_for_disjoint_rects() {
        let a = IntRect::new(0, 0, 10, 10);
        let b = IntRect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
        assert_eq!(
            a.intersect(&IntRect::new(5, 5, 10, 10)),
            Some(IntRect::new(5, 5, 5, 5))
        );
    }

    #[test]
    fn bitmap_config_maps_to_expected_pixel_formats() {
        assert_eq!(BitmapConfig::Alpha8.pixel_format(), PixelFormat::R8);
        assert_eq!(BitmapConfig::Rgb565.pixel_format(), PixelFormat::Packed565);
        assert_eq!(BitmapConfig::Argb4444.pixel_format(), PixelFormat::Packed4444);
        assert_eq!(BitmapConfig::Argb8888.pixel_format(), PixelFormat::Rgba8);
        assert_eq!(BitmapConfig::Rgb565.bytes_per_pixel(), 2);
    }

    #[test]
    fn bitmap_rejects_wrong_buffer_length() {
        let error = PaintedBitmap::new(4, 4, BitmapConfig::Argb8888, vec![0; 10])
            .expect_err("length mismatch");
        assert_eq!(
            error,
            BitmapError::BufferLengthMismatch {
                expected: 64,
                actual: 10
            }
        );
    }

    #[test]
    fn copy_into_reuses_buffer_contents() {
        let bitmap = PaintedBitmap::filled(2, 2, BitmapConfig::Alpha8, 7).expect("bitmap");
        let copy = bitmap.copy_into(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(copy, bitmap);
    }
}
