//! canopy: tree-canopy training data from orthophotos and LIDAR
//!
//! This library downsamples and subdivides orthophoto tiles, rasterizes
//! LIDAR high-vegetation returns into binary ground-truth response tiles,
//! and evaluates pixel classifiers against that ground truth.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandStack, BoundingBox, CanopyError, CanopyResult, GeoTransform, LidarPoint, LidarPointBatch,
    RasterTile, Stage, TileGrid, Window,
};

pub use config::{CacheDirs, EndpointConfig, EvaluationParams, PipelineConfig, ResampleParams, ResponseParams};
pub use io::{FileCache, HttpFetcher, LidarPointSource, RasterReader, RasterWriter};
pub use crate::core::{
    ConfusionEvaluator, ConfusionMatrix, GeometryIndex, Metrics, ResponseRasterBuilder, TileResampler,
};
