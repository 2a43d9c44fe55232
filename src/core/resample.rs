//! Orthophoto downsampling and N x N subdivision
//!
//! Raw tiles are fetched into a local cache, read at reduced resolution
//! with an averaging policy and cut into a grid of output tiles, each with
//! its own transform. Batches resume at the first source tile whose
//! outputs are incomplete.

use crate::config::{CacheDirs, EndpointConfig, ResampleParams};
use crate::core::geometry_index::bbox_intersects;
use crate::core::tasks::{run_tasks, TaskFailure};
use crate::io::cache::{ArtifactCache, FileCache};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::io::remote::{asset_uri, RemoteFetcher};
use crate::types::{
    BandStack, CanopyError, CanopyResult, GeoTransform, RasterTile, Stage, TileContext, Window,
};
use geo::MultiPolygon;
use ndarray::{s, Array3};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One output tile cut from a downsampled source
#[derive(Debug, Clone)]
pub struct SubTile {
    /// Position in subdivision order, used in the output file name
    pub index: usize,
    pub window: Window,
    pub transform: GeoTransform,
    pub data: BandStack,
}

/// Outcome of a resampling batch
#[derive(Debug)]
pub struct ResampleReport {
    /// Output tiles of every source, including sources skipped on resume
    pub outputs: Vec<PathBuf>,
    pub skipped_sources: usize,
    pub processed_sources: usize,
    pub failures: Vec<TaskFailure>,
}

/// Outcome of the boundary filter
#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    pub kept: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Windows of an `n` x `n` subdivision of a `width` x `height` raster.
///
/// Strides are `width / n` and `height / n`; each stride window is clipped
/// to the raster, so trailing windows are smaller (and extra windows
/// appear) when the size is not divisible by `n`. Windows are ordered
/// column-major: all rows of the first column stride come first.
pub fn subdivision_windows(width: usize, height: usize, subdivisions: usize) -> CanopyResult<Vec<Window>> {
    if subdivisions == 0 {
        return Err(CanopyError::InvalidParameter(
            "Number of subdivisions must be at least 1".to_string(),
        ));
    }

    let stride_width = width / subdivisions;
    let stride_height = height / subdivisions;
    if stride_width == 0 || stride_height == 0 {
        return Err(CanopyError::InvalidParameter(format!(
            "{}x{} raster cannot be split into {} subdivisions per axis",
            width, height, subdivisions
        )));
    }

    let parent = Window::full(width, height);
    let mut windows = Vec::with_capacity(subdivisions * subdivisions);
    for col_off in (0..width).step_by(stride_width) {
        for row_off in (0..height).step_by(stride_height) {
            windows.push(Window::new(col_off, row_off, stride_width, stride_height).intersection(&parent));
        }
    }
    Ok(windows)
}

/// Block-average every band by `factor` on both axes. The output size is
/// the integer quotient of the input size; trailing rows and columns that
/// do not fill a whole block are dropped.
pub fn downsample_average(data: &BandStack, factor: usize) -> CanopyResult<BandStack> {
    let (bands, rows, cols) = data.dim();
    if factor == 0 {
        return Err(CanopyError::InvalidParameter(
            "Resample factor must be at least 1".to_string(),
        ));
    }

    let out_rows = rows / factor;
    let out_cols = cols / factor;
    if out_rows == 0 || out_cols == 0 {
        return Err(CanopyError::InvalidParameter(format!(
            "Resample factor {} too large for {}x{} raster",
            factor, cols, rows
        )));
    }

    let mut output = Array3::<f32>::zeros((bands, out_rows, out_cols));
    let block_size = (factor * factor) as f64;
    for band in 0..bands {
        for out_row in 0..out_rows {
            for out_col in 0..out_cols {
                let block = data.slice(s![
                    band,
                    out_row * factor..(out_row + 1) * factor,
                    out_col * factor..(out_col + 1) * factor
                ]);
                let sum: f64 = block.iter().map(|&v| v as f64).sum();
                output[[band, out_row, out_col]] = (sum / block_size) as f32;
            }
        }
    }
    Ok(output)
}

/// Cut a tile into sub-tiles along `windows`
fn cut(tile: &RasterTile, windows: Vec<Window>) -> Vec<SubTile> {
    windows
        .into_iter()
        .enumerate()
        .map(|(index, window)| SubTile {
            index,
            window,
            transform: tile.transform.for_window(&window),
            data: tile
                .data
                .slice(s![
                    ..,
                    window.row_off..window.row_off + window.height,
                    window.col_off..window.col_off + window.width
                ])
                .to_owned(),
        })
        .collect()
}

/// Deterministic output file name: `<stem>_<index:02>.<extension>`
pub fn output_tile_name(source_name: &str, index: usize, extension: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_name.to_string());
    format!("{}_{:02}.{}", stem, index, extension)
}

/// Downsamples and subdivides orthophoto tiles
pub struct TileResampler {
    params: ResampleParams,
    base_uri: String,
    raw: FileCache,
    tiles: FileCache,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl TileResampler {
    pub fn new(
        params: ResampleParams,
        endpoints: &EndpointConfig,
        dirs: &CacheDirs,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> CanopyResult<Self> {
        if params.resample_factor == 0 || params.subdivisions == 0 {
            return Err(CanopyError::InvalidParameter(format!(
                "Resample factor ({}) and subdivisions ({}) must be at least 1",
                params.resample_factor, params.subdivisions
            )));
        }

        Ok(Self {
            params,
            base_uri: endpoints.orthophoto_base_uri.clone(),
            raw: FileCache::new(&dirs.raw_tiles_dir)?,
            tiles: FileCache::new(&dirs.tiles_dir)?,
            fetcher,
        })
    }

    pub fn params(&self) -> &ResampleParams {
        &self.params
    }

    /// Downsample an in-memory tile by averaging and subdivide the result
    pub fn resample_and_subdivide(&self, raw: &RasterTile) -> CanopyResult<Vec<SubTile>> {
        let factor = self.params.resample_factor;
        let reduced = RasterTile {
            data: downsample_average(&raw.data, factor)?,
            transform: raw.transform.scaled(factor),
            crs: raw.crs.clone(),
            nodata: raw.nodata,
            sample_type: raw.sample_type,
        };
        self.subdivide(&reduced)
    }

    /// Subdivide an already downsampled tile
    pub fn subdivide(&self, tile: &RasterTile) -> CanopyResult<Vec<SubTile>> {
        let windows = subdivision_windows(tile.width(), tile.height(), self.params.subdivisions)?;
        Ok(cut(tile, windows))
    }

    fn output_path(&self, source_name: &str, index: usize) -> PathBuf {
        self.tiles
            .path_for(&output_tile_name(source_name, index, &self.params.output_extension))
    }

    /// The `subdivisions²` output paths a fully processed source has
    pub fn expected_outputs(&self, source_name: &str) -> Vec<PathBuf> {
        let count = self.params.subdivisions * self.params.subdivisions;
        (0..count).map(|i| self.output_path(source_name, i)).collect()
    }

    fn is_complete(&self, source_name: &str) -> bool {
        self.expected_outputs(source_name).iter().all(|path| path.exists())
    }

    /// Index of the first source whose outputs are not all present, or
    /// `sources.len()` when every source is complete
    pub fn resume_index(&self, sources: &[String]) -> usize {
        sources
            .iter()
            .position(|source| !self.is_complete(source))
            .unwrap_or(sources.len())
    }

    /// Fetch, downsample, subdivide and write one source tile
    pub fn process_source(&self, source_name: &str) -> CanopyResult<Vec<PathBuf>> {
        let uri = asset_uri(&self.base_uri, source_name);
        let fetcher = &self.fetcher;
        let raw = self
            .raw
            .get_or_compute(source_name, &mut |staging: &Path| fetcher.fetch_to(&uri, staging))
            .at_tile(source_name, Stage::Download)?;

        let reduced = RasterReader::read_downsampled(&raw.path, self.params.resample_factor)
            .at_tile(source_name, Stage::Resample)?;
        let sub_tiles = self.subdivide(&reduced).at_tile(source_name, Stage::Resample)?;

        let mut outputs = Vec::with_capacity(sub_tiles.len());
        for sub_tile in sub_tiles {
            let name = output_tile_name(source_name, sub_tile.index, &self.params.output_extension);
            let tile = RasterTile {
                data: sub_tile.data,
                transform: sub_tile.transform,
                crs: reduced.crs.clone(),
                nodata: reduced.nodata,
                sample_type: reduced.sample_type,
            };
            let path = self
                .tiles
                .insert_with(&name, &mut |staging: &Path| RasterWriter::write_tile(&tile, staging))
                .at_tile(source_name, Stage::Write)?;
            outputs.push(path);
        }

        if !self.params.keep_raw {
            self.raw.remove(source_name).at_tile(source_name, Stage::Write)?;
        }

        log::debug!("Wrote {} tiles for {}", outputs.len(), source_name);
        Ok(outputs)
    }

    fn existing_outputs(&self, source_name: &str) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        for index in 0.. {
            let path = self.output_path(source_name, index);
            if !path.exists() {
                break;
            }
            outputs.push(path);
        }
        outputs
    }

    /// Process a list of source tile names, resuming after the sources
    /// that are already complete
    pub fn run_batch(&self, sources: &[String]) -> CanopyResult<ResampleReport> {
        let start = self.resume_index(sources);
        if start > 0 {
            log::info!("Skipping {} tiles because they have already been processed", start);
        }

        let pending = &sources[start..];
        log::info!("Downloading and downscaling {} tiles from {}", pending.len(), self.base_uri);

        let done = AtomicUsize::new(0);
        let settled = run_tasks(pending, self.params.failure_policy, |source| {
            let result = self.process_source(source);
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            log::info!("Processed {}/{} tiles ({})", finished, pending.len(), source);
            result
        })?;

        let mut outputs: Vec<PathBuf> = sources[..start]
            .iter()
            .flat_map(|source| self.existing_outputs(source))
            .collect();
        let processed_sources = settled.completed.len();
        outputs.extend(settled.completed.into_values().flatten());

        log::info!(
            "✅ Resampled {} tiles into {} output tiles ({} failed)",
            processed_sources,
            outputs.len(),
            settled.failures.len()
        );

        // report failures by position in `sources`
        let failures = settled
            .failures
            .into_iter()
            .map(|failure| TaskFailure {
                id: failure.id + start,
                error: failure.error,
            })
            .collect();

        Ok(ResampleReport {
            outputs,
            skipped_sources: start,
            processed_sources,
            failures,
        })
    }
}

/// Keep the tiles whose bounding box intersects `boundary`; delete the rest
pub fn filter_by_boundary(tiles: &[PathBuf], boundary: &MultiPolygon<f64>) -> CanopyResult<FilterReport> {
    let mut report = FilterReport::default();

    for tile in tiles {
        let name = tile.to_string_lossy();
        let grid = RasterReader::read_grid(tile).at_tile(&name, Stage::BoundaryFilter)?;
        if bbox_intersects(boundary, &grid.bounds()) {
            report.kept.push(tile.clone());
        } else {
            std::fs::remove_file(tile)
                .map_err(CanopyError::Io)
                .at_tile(&name, Stage::BoundaryFilter)?;
            report.removed.push(tile.clone());
        }
    }

    log::info!(
        "Removed {} tiles that do not intersect the boundary, kept {}",
        report.removed.len(),
        report.kept.len()
    );
    Ok(report)
}
