use std::fmt;
use std::sync::Arc;

use render_protocol::{GroupId, TileId, TilePainter};

use crate::operation::PaintTileOperation;

/// Standard predicates for cancelling paint requests.
#[derive(Clone)]
pub enum CancelFilter {
    /// Every request for tiles of one group (page).
    Group(GroupId),
    Tile(TileId),
    /// Every request painted by this painter instance.
    Painter(Arc<dyn TilePainter>),
    /// Requests of `painter` whose tile is no longer at `scale`.
    StaleScale {
        painter: Arc<dyn TilePainter>,
        scale: f32,
    },
}

impl fmt::Debug for CancelFilter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelFilter::Group(group) => formatter.debug_tuple("Group").field(group).finish(),
            CancelFilter::Tile(tile) => formatter.debug_tuple("Tile").field(tile).finish(),
            CancelFilter::Painter(painter) => formatter
                .debug_tuple("Painter")
                .field(&Arc::as_ptr(painter).cast::<()>())
                .finish(),
            CancelFilter::StaleScale { painter, scale } => formatter
                .debug_struct("StaleScale")
                .field("painter", &Arc::as_ptr(painter).cast::<()>())
                .field("scale", scale)
                .finish(),
        }
    }
}

impl CancelFilter {
    pub fn matches(&self, operation: &PaintTileOperation) -> bool {
        match self {
            CancelFilter::Group(group) => operation.group() == *group,
            CancelFilter::Tile(tile) => operation.tile_id() == *tile,
            CancelFilter::Painter(painter) => operation.paints_with(painter),
            CancelFilter::StaleScale { painter, scale } => {
                operation.paints_with(painter) && operation.scale() != *scale
            }
        }
    }
}
