//! Ground-truth response rasters from LIDAR high-vegetation returns
//!
//! For every orthophoto tile the LIDAR sources covering it are fetched and
//! filtered, their points are counted per pixel, the counts are thresholded
//! and opened, and the mask is written as a single-band 8-bit GeoTIFF on
//! the tile's grid. Existing outputs are returned without recomputation.

use crate::config::ResponseParams;
use crate::core::evaluate::GroundTruth;
use crate::core::geometry_index::GeometryIndex;
use crate::core::morphology::binary_opening;
use crate::core::rasterize::{encode_mask, rasterize_additive, threshold_counts};
use crate::core::tasks::{run_tasks, FailurePolicy, TaskFailure};
use crate::io::cache::ArtifactCache;
use crate::io::lidar::{filter_points, ClassificationPredicate, PointSource};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{CanopyError, CanopyResult, LidarPoint, Stage, TileContext, TileGrid};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of building response rasters for many tiles
#[derive(Debug)]
pub struct ResponseReport {
    /// Response raster of every successful tile, in input order
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<TaskFailure>,
}

/// Response rasters share the file name of their orthophoto tile
pub fn response_name(tile: &Path) -> CanopyResult<String> {
    tile.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            CanopyError::InvalidParameter(format!("Tile path {} has no file name", tile.display()))
        })
}

/// Boolean canopy mask of `points` on `grid`: count per pixel, keep
/// pixels at or above the threshold, then open the result
pub fn canopy_mask(points: &[LidarPoint], grid: &TileGrid, params: &ResponseParams) -> Array2<bool> {
    if points.is_empty() {
        log::debug!("No qualifying points, response is all nodata");
        return Array2::from_elem((grid.height, grid.width), false);
    }

    let counts = rasterize_additive(points, grid);
    let mask = threshold_counts(&counts, params.threshold);
    binary_opening(&mask, params.structuring_element)
}

pub struct ResponseRasterBuilder {
    params: ResponseParams,
    index: Arc<GeometryIndex>,
    points: Arc<dyn PointSource>,
    output: Arc<dyn ArtifactCache>,
}

impl ResponseRasterBuilder {
    pub fn new(
        params: ResponseParams,
        index: Arc<GeometryIndex>,
        points: Arc<dyn PointSource>,
        output: Arc<dyn ArtifactCache>,
    ) -> Self {
        Self {
            params,
            index,
            points,
            output,
        }
    }

    pub fn params(&self) -> &ResponseParams {
        &self.params
    }

    /// High-vegetation points of every source covering `grid`
    pub fn gather_points(&self, grid: &TileGrid) -> CanopyResult<Vec<LidarPoint>> {
        let bounds = grid.bounds();
        let sources = self.index.intersecting(&bounds);
        if sources.is_empty() {
            log::info!("No LIDAR sources intersect tile bounds {:?}", bounds);
            return Ok(Vec::new());
        }

        let predicate = ClassificationPredicate::new(self.params.high_vegetation_codes);
        let mut points = Vec::new();
        for source in sources {
            let batch = self.points.fetch(source)?;
            let filtered = filter_points(&batch, &predicate, &bounds);
            log::debug!("{}: kept {} of {} points", source, filtered.len(), batch.len());
            points.extend(filtered.points);
        }
        Ok(points)
    }

    /// Encoded response labels for `grid`
    pub fn compute(&self, grid: &TileGrid) -> CanopyResult<Array2<u8>> {
        let points = self.gather_points(grid)?;
        let mask = canopy_mask(&points, grid, &self.params);
        Ok(encode_mask(&mask, self.params.tree_value, self.params.nodata_value))
    }

    /// Path of the response raster of `tile`, building it when missing
    pub fn build(&self, tile: &Path) -> CanopyResult<PathBuf> {
        let name = tile.to_string_lossy();
        let key = response_name(tile)?;
        if let Some(path) = self.output.lookup(&key) {
            log::debug!("Response raster {} already exists", path.display());
            return Ok(path);
        }

        let grid = RasterReader::read_grid(tile).at_tile(&name, Stage::GroundTruth)?;
        let labels = self.compute(&grid).at_tile(&name, Stage::Lidar)?;
        let nodata = self.params.nodata_value;
        self.output
            .insert_with(&key, &mut |staging: &Path| {
                RasterWriter::write_labels(&labels, &grid, nodata, staging)
            })
            .at_tile(&name, Stage::Write)
    }

    /// Build response rasters for many tiles on the task executor
    pub fn build_many(&self, tiles: &[PathBuf], policy: FailurePolicy) -> CanopyResult<ResponseReport> {
        log::info!("Building response rasters for {} tiles", tiles.len());
        let settled = run_tasks(tiles, policy, |tile| self.build(tile))?;
        let outputs: Vec<PathBuf> = settled.completed.into_values().collect();
        log::info!(
            "✅ Built {} response rasters ({} failed)",
            outputs.len(),
            settled.failures.len()
        );
        Ok(ResponseReport {
            outputs,
            failures: settled.failures,
        })
    }
}

impl GroundTruth for ResponseRasterBuilder {
    fn ground_truth(&self, tile: &Path) -> CanopyResult<Array2<u8>> {
        let path = self.build(tile)?;
        RasterReader::read_labels(&path).at_tile(&tile.to_string_lossy(), Stage::GroundTruth)
    }
}
