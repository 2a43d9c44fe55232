//! I/O modules for rasters, tile lists, remote assets, caches, LIDAR and boundaries

pub mod boundary;
pub mod cache;
pub mod lidar;
pub mod raster;
pub mod remote;
pub mod tile_list;

pub use boundary::{target_minus_excluded, BoundaryProvider, StaticBoundaries, VectorFileBoundaries};
pub use cache::{ArtifactCache, CacheEntry, FileCache};
pub use lidar::{filter_points, ClassificationPredicate, LidarPointSource, PointSource};
pub use raster::{RasterReader, RasterWriter};
pub use remote::{HttpFetcher, RemoteFetcher};
pub use tile_list::{read_split_table, read_tile_list, write_tile_list, SplitRecord};
