use geo::{coord, Rect};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multi-band pixel data (band x row x col)
pub type BandStack = Array3<f32>;

/// LIDAR classification code (ASPRS LAS classes)
pub type ClassificationCode = u8;

/// Affine transform mapping pixel (col, row) to world (x, y)
///
/// Coefficient layout follows GDAL's geotransform:
/// `x = top_left_x + col * pixel_width + row * rotation_x`
/// `y = top_left_y + col * rotation_y + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinate of the upper-left corner of pixel (col, row)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate, or `None` for a
    /// singular transform
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((col, row))
    }

    /// Scale the pixel size by an integer factor, keeping origin and shear
    pub fn scaled(&self, factor: usize) -> Self {
        Self {
            pixel_width: self.pixel_width * factor as f64,
            pixel_height: self.pixel_height * factor as f64,
            ..*self
        }
    }

    /// Transform of a window: the parent transform translated by the
    /// window's pixel offset
    pub fn for_window(&self, window: &Window) -> Self {
        let (x, y) = self.apply(window.col_off as f64, window.row_off as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// World-space bounds of a `width` x `height` grid under this transform
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.max_x = bbox.max_x.max(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

/// Axis-aligned world-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Inclusive containment on all four edges
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

/// Pixel-space window into a parent raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// Window covering a whole `width` x `height` raster
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersection of two windows; empty overlaps collapse to zero size
    pub fn intersection(&self, other: &Window) -> Window {
        let col_off = self.col_off.max(other.col_off);
        let row_off = self.row_off.max(other.row_off);
        let col_end = (self.col_off + self.width).min(other.col_off + other.width);
        let row_end = (self.row_off + self.height).min(other.row_off + other.height);
        Window {
            col_off,
            row_off,
            width: col_end.saturating_sub(col_off),
            height: row_end.saturating_sub(row_off),
        }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// On-disk sample type of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    Byte,
    UInt16,
    Int16,
    Float32,
}

/// Pixel grid of a raster without its pixel data
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    /// Coordinate reference system as WKT (empty when unknown)
    pub crs: String,
}

impl TileGrid {
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// (row, col) of the pixel containing a world coordinate, if inside the grid
    pub fn pixel_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.invert(x, y)?;
        let (col, row) = (col.floor(), row.floor());
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Geo-referenced multi-band raster held in memory
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub data: BandStack,
    pub transform: GeoTransform,
    pub crs: String,
    pub nodata: Option<f64>,
    pub sample_type: SampleType,
}

impl RasterTile {
    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn grid(&self) -> TileGrid {
        TileGrid {
            width: self.width(),
            height: self.height(),
            transform: self.transform,
            crs: self.crs.clone(),
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width(), self.height())
    }
}

/// Single LIDAR return reduced to what ground truth needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarPoint {
    pub x: f64,
    pub y: f64,
    pub classification: ClassificationCode,
}

/// Points of one LIDAR source file, in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LidarPointBatch {
    pub source_id: String,
    pub points: Vec<LidarPoint>,
}

impl LidarPointBatch {
    pub fn new(source_id: impl Into<String>, points: Vec<LidarPoint>) -> Self {
        Self { source_id: source_id.into(), points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Pipeline stage, attached to tile failures for diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Resample,
    Write,
    BoundaryFilter,
    Lidar,
    Classify,
    GroundTruth,
    Evaluate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Resample => "resample",
            Stage::Write => "write",
            Stage::BoundaryFilter => "boundary filter",
            Stage::Lidar => "lidar",
            Stage::Classify => "classify",
            Stage::GroundTruth => "ground truth",
            Stage::Evaluate => "evaluate",
        };
        write!(f, "{}", name)
    }
}

/// Error types for canopy processing
#[derive(Debug, thiserror::Error)]
pub enum CanopyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource unavailable at {uri}: {reason}")]
    ResourceUnavailable { uri: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Label {label} is outside the binary label set {{0, {tree_value}}}")]
    LabelOutOfDomain { label: u8, tree_value: u8 },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Tile {tile} failed during {stage}: {source}")]
    Tile {
        tile: String,
        stage: Stage,
        #[source]
        source: Box<CanopyError>,
    },
}

impl CanopyError {
    /// Attach tile and stage context to an error. An error that already
    /// carries tile context keeps the stage where it was first tagged.
    pub fn at(self, tile: impl Into<String>, stage: Stage) -> Self {
        match self {
            tagged @ CanopyError::Tile { .. } => tagged,
            error => CanopyError::Tile {
                tile: tile.into(),
                stage,
                source: Box::new(error),
            },
        }
    }
}

/// Result type for canopy operations
pub type CanopyResult<T> = Result<T, CanopyError>;

/// Extension for tagging fallible results with tile context
pub trait TileContext<T> {
    fn at_tile(self, tile: &str, stage: Stage) -> CanopyResult<T>;
}

impl<T> TileContext<T> for CanopyResult<T> {
    fn at_tile(self, tile: &str, stage: Stage) -> CanopyResult<T> {
        self.map_err(|e| e.at(tile, stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn north_up() -> GeoTransform {
        GeoTransform::from_gdal([2_680_000.0, 0.5, 0.0, 1_250_000.0, 0.0, -0.5])
    }

    #[test]
    fn test_window_transform_matches_parent_offset() {
        let parent = north_up();
        let window = Window::new(40, 25, 10, 10);
        let child = parent.for_window(&window);

        let (x0, y0) = child.apply(0.0, 0.0);
        let (px, py) = parent.apply(40.0, 25.0);
        assert_relative_eq!(x0, px);
        assert_relative_eq!(y0, py);
        assert_eq!(child.pixel_width, parent.pixel_width);
        assert_eq!(child.pixel_height, parent.pixel_height);
    }

    #[test]
    fn test_scaled_keeps_origin() {
        let scaled = north_up().scaled(5);
        assert_eq!(scaled.top_left_x, 2_680_000.0);
        assert_eq!(scaled.top_left_y, 1_250_000.0);
        assert_relative_eq!(scaled.pixel_width, 2.5);
        assert_relative_eq!(scaled.pixel_height, -2.5);
        assert_eq!(scaled.rotation_x, 0.0);
    }

    #[test]
    fn test_bounds_north_up() {
        let bbox = north_up().bounds(100, 40);
        assert_relative_eq!(bbox.min_x, 2_680_000.0);
        assert_relative_eq!(bbox.max_x, 2_680_050.0);
        assert_relative_eq!(bbox.min_y, 1_249_980.0);
        assert_relative_eq!(bbox.max_y, 1_250_000.0);
    }

    #[test]
    fn test_invert_roundtrip_with_shear() {
        let gt = GeoTransform::from_gdal([10.0, 2.0, 0.5, 20.0, 0.25, -3.0]);
        let (x, y) = gt.apply(7.25, 3.5);
        let (col, row) = gt.invert(x, y).unwrap();
        assert_relative_eq!(col, 7.25, epsilon = 1e-9);
        assert_relative_eq!(row, 3.5, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_of_excludes_far_edges() {
        let grid = TileGrid {
            width: 4,
            height: 4,
            transform: GeoTransform::from_gdal([0.0, 1.0, 0.0, 4.0, 0.0, -1.0]),
            crs: String::new(),
        };
        assert_eq!(grid.pixel_of(0.0, 4.0), Some((0, 0)));
        assert_eq!(grid.pixel_of(3.99, 0.01), Some((3, 3)));
        assert_eq!(grid.pixel_of(4.0, 2.0), None);
        assert_eq!(grid.pixel_of(2.0, 0.0), None);
    }

    #[test]
    fn test_window_intersection_clips() {
        let parent = Window::full(11, 11);
        let clipped = Window::new(10, 8, 2, 2).intersection(&parent);
        assert_eq!(clipped, Window::new(10, 8, 1, 2));
    }

    #[test]
    fn test_tile_error_context() {
        let err = CanopyError::Processing("boom".to_string()).at("2680_1250.tif", Stage::Lidar);
        let msg = format!("{}", err);
        assert!(msg.contains("2680_1250.tif"));
        assert!(msg.contains("during lidar"));
    }

    #[test]
    fn test_tile_context_is_attached_once() {
        let err = CanopyError::Processing("boom".to_string())
            .at("2680_1250.tif", Stage::Lidar)
            .at("2680_1250.tif", Stage::GroundTruth);
        let msg = format!("{}", err);
        assert_eq!(msg.matches("failed during").count(), 1, "{}", msg);
        assert!(matches!(err, CanopyError::Tile { stage: Stage::Lidar, .. }));

        let result: CanopyResult<()> = Err(err);
        let msg = result.at_tile("2680_1250.tif", Stage::Evaluate).unwrap_err().to_string();
        assert_eq!(msg, "Tile 2680_1250.tif failed during lidar: Processing error: boom");
    }
}
