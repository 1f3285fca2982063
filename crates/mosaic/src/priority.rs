use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use render_protocol::TileCoord;

/// Priority for requests whose tile is gone; they run at once and do nothing.
pub const DEAD_TILE_PRIORITY: i32 = -1;

const BASE_PRIORITY: i32 = 200_000;
const IDLE_PREFETCH_PRIORITY: i32 = 400_000;
const DRAW_DELTA_WEIGHT: i32 = 100_000;
const MAX_DRAW_DELTA: u64 = 1000;
const SHOWING_CONTENT_PENALTY: i32 = 50_000;
const ROW_WEIGHT: i32 = 1000;
const SCROLL_DOWN_OFFSET: i32 = 100_000;

/// Where a tile sits in the mosaic, as far as ordering is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileRole {
    /// A tile of the visible base surface, ordered by grid position.
    #[default]
    Base,
    /// A tile of the off-screen prefetch surface.
    Prefetch,
    /// A tile of a composited layer; position does not matter.
    Layer,
}

/// Frame counter and scroll state shared by every queued request.
#[derive(Debug, Default)]
pub struct ViewState {
    frame: AtomicU64,
    scrolling: AtomicBool,
    scrolling_down: AtomicBool,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Starts a new frame and returns its number.
    pub fn advance_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_scrolling(&self, scrolling: bool, down: bool) {
        self.scrolling.store(scrolling, Ordering::Release);
        self.scrolling_down.store(down, Ordering::Release);
    }

    pub fn is_scrolling(&self) -> bool {
        self.scrolling.load(Ordering::Acquire)
    }

    pub fn is_scrolling_down(&self) -> bool {
        self.scrolling_down.load(Ordering::Acquire)
    }
}

/// Inputs for one priority evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInputs {
    pub role: TileRole,
    pub scrolling: bool,
    pub scrolling_down: bool,
    pub current_frame: u64,
    pub tile_draw_count: u64,
    pub showing_content: bool,
    pub coord: TileCoord,
}

/// Lower runs first. Prefetch tiles jump ahead while scrolling and fall behind
/// otherwise; tiles that have not been drawn for a while sink; tiles already
/// showing something wait for blank ones; base tiles follow the scroll
/// direction row by row.
pub fn paint_priority(inputs: PriorityInputs) -> i32 {
    let mut priority = BASE_PRIORITY;
    if inputs.role == TileRole::Prefetch {
        priority = if inputs.scrolling {
            0
        } else {
            IDLE_PREFETCH_PRIORITY
        };
    }

    let draw_delta = inputs
        .current_frame
        .saturating_sub(inputs.tile_draw_count)
        .min(MAX_DRAW_DELTA) as i32;
    priority += DRAW_DELTA_WEIGHT * draw_delta;

    if inputs.showing_content {
        priority += SHOWING_CONTENT_PENALTY;
    }

    if inputs.role != TileRole::Layer {
        let TileCoord { column, row } = inputs.coord;
        priority = priority.saturating_add(column);
        let row_term = if inputs.scrolling_down {
            SCROLL_DOWN_OFFSET.saturating_sub(row.saturating_add(1).saturating_mul(ROW_WEIGHT))
        } else {
            row.saturating_mul(ROW_WEIGHT)
        };
        priority = priority.saturating_add(row_term);
    }
    priority
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PriorityInputs {
        PriorityInputs {
            role: TileRole::Base,
            scrolling: false,
            scrolling_down: false,
            current_frame: 10,
            tile_draw_count: 10,
            showing_content: false,
            coord: TileCoord::new(0, 0),
        }
    }

    #[test]
    fn fresh_base_tile_at_origin_gets_base_priority() {
        assert_eq!(paint_priority(inputs()), 200_000);
    }

    #[test]
    fn prefetch_depends_on_scrolling() {
        let idle = PriorityInputs {
            role: TileRole::Prefetch,
            ..inputs()
        };
        let scrolling = PriorityInputs {
            scrolling: true,
            ..idle
        };
        assert_eq!(paint_priority(idle), 400_000);
        assert_eq!(paint_priority(scrolling), 0);
    }

    #[test]
    fn draw_delta_is_capped() {
        let stale = PriorityInputs {
            current_frame: 12,
            tile_draw_count: 10,
            ..inputs()
        };
        let ancient = PriorityInputs {
            current_frame: 1_000_000,
            tile_draw_count: 0,
            role: TileRole::Layer,
            ..inputs()
        };
        assert_eq!(paint_priority(stale), 400_000);
        assert_eq!(paint_priority(ancient), 200_000 + 100_000 * 1000);
    }

    #[test]
    fn tiles_showing_content_wait_for_blank_ones() {
        let showing = PriorityInputs {
            showing_content: true,
            ..inputs()
        };
        assert_eq!(paint_priority(showing), 250_000);
        assert!(paint_priority(inputs()) < paint_priority(showing));
    }

    #[test]
    fn base_position_follows_scroll_direction() {
        let at = |column, row, down| {
            paint_priority(PriorityInputs {
                coord: TileCoord::new(column, row),
                scrolling_down: down,
                ..inputs()
            })
        };
        assert_eq!(at(3, 2, false), 200_000 + 3 + 2000);
        assert_eq!(at(3, 2, true), 200_000 + 3 + 100_000 - 3000);
        assert!(at(0, 1, false) < at(0, 2, false));
        assert!(at(0, 2, true) < at(0, 1, true));
    }

    #[test]
    fn layer_tiles_ignore_position() {
        let layer = PriorityInputs {
            role: TileRole::Layer,
            coord: TileCoord::new(7, 9),
            ..inputs()
        };
        assert_eq!(paint_priority(layer), 200_000);
    }

    #[test]
    fn view_state_counts_frames() {
        let view = ViewState::new();
        assert_eq!(view.frame(), 0);
        assert_eq!(view.advance_frame(), 1);
        assert_eq!(view.advance_frame(), 2);
        view.set_scrolling(true, true);
        assert!(view.is_scrolling());
        assert!(view.is_scrolling_down());
    }
}
