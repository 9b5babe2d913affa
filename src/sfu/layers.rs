use crate::manager::RenderedSize;

/// Simulcast layer requested for one video consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layer {
    pub spatial_id: u8,
    pub temporal_id: u8,
}

impl Layer {
    pub fn new(spatial_id: u8, temporal_id: u8) -> Self {
        Self {
            spatial_id,
            temporal_id,
        }
    }
}

const LOW_RESOLUTION_LIMIT: u32 = 480;
const MEDIUM_RESOLUTION_LIMIT: u32 = 960;
const SMALL_TILE_LIMIT: u32 = 100;
const BOOST_TILE_MIN: u32 = 200;
const BOOST_MAX_ACTIVE_VIDEOS: usize = 4;
const CROWDED_LOWEST_LAYER_VIDEOS: usize = 8;

/// Spatial layer for a tile, before any adjustment for the number of active videos.
pub fn spatial_for_size(size: RenderedSize) -> u8 {
    let side = size.largest_side();
    if side < LOW_RESOLUTION_LIMIT {
        0
    } else if side < MEDIUM_RESOLUTION_LIMIT {
        1
    } else {
        2
    }
}

/// Picks the layer for a tile of `size` while `active_videos` remote videos are playing,
/// `videos_at_lowest` of which sit at spatial layer 0.
pub fn select_layer(size: RenderedSize, active_videos: usize, videos_at_lowest: usize) -> Layer {
    let side = size.largest_side();
    let mut spatial_id = spatial_for_size(size);
    if active_videos < BOOST_MAX_ACTIVE_VIDEOS && side >= BOOST_TILE_MIN {
        spatial_id = spatial_id.max(1);
    }

    let temporal_id = if side < SMALL_TILE_LIMIT || videos_at_lowest > CROWDED_LOWEST_LAYER_VIDEOS
    {
        1
    } else {
        2
    };

    Layer::new(spatial_id, temporal_id)
}
