//! Point rasterization with additive merge, and canopy thresholding

use crate::types::{LidarPoint, TileGrid};
use ndarray::Array2;

/// Burn every point into the pixel that contains it, summing overlaps.
/// Each cell ends up holding the number of points that fall inside it;
/// points outside the grid are dropped.
pub fn rasterize_additive(points: &[LidarPoint], grid: &TileGrid) -> Array2<u32> {
    let mut counts = Array2::<u32>::zeros((grid.height, grid.width));
    let mut outside = 0usize;

    for point in points {
        match grid.pixel_of(point.x, point.y) {
            Some((row, col)) => counts[[row, col]] += 1,
            None => outside += 1,
        }
    }

    if outside > 0 {
        log::debug!("{} of {} points fell outside the tile grid", outside, points.len());
    }
    counts
}

/// Cells whose count reaches `threshold`
#[cfg(feature = "parallel")]
pub fn threshold_counts(counts: &Array2<u32>, threshold: u32) -> Array2<bool> {
    ndarray::Zip::from(counts).par_map_collect(|&count| count >= threshold)
}

/// Cells whose count reaches `threshold`
#[cfg(not(feature = "parallel"))]
pub fn threshold_counts(counts: &Array2<u32>, threshold: u32) -> Array2<bool> {
    counts.mapv(|count| count >= threshold)
}

/// Scale a boolean mask to `{nodata_value, tree_value}`
pub fn encode_mask(mask: &Array2<bool>, tree_value: u8, nodata_value: u8) -> Array2<u8> {
    mask.mapv(|canopy| if canopy { tree_value } else { nodata_value })
}
