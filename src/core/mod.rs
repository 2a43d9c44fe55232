//! Core canopy processing modules

pub mod confusion;
pub mod evaluate;
pub mod geometry_index;
pub mod morphology;
pub mod rasterize;
pub mod resample;
pub mod response;
pub mod tasks;

// Re-export main types
pub use confusion::{BinaryLabels, ConfusionMatrix, Metrics, PairCounts};
pub use evaluate::{
    Classifier, ClusterId, ConfusionEvaluator, Evaluation, GroundTruth, Predictor, RasterPredictor,
    SampleSize, ValidationPool, ValidationTile,
};
pub use geometry_index::{Footprint, GeometryIndex, SpatialPredicate};
pub use morphology::{binary_dilation, binary_erosion, binary_opening, StructuringElement};
pub use rasterize::{encode_mask, rasterize_additive, threshold_counts};
pub use resample::{filter_by_boundary, subdivision_windows, FilterReport, ResampleReport, SubTile, TileResampler};
pub use response::{canopy_mask, ResponseRasterBuilder, ResponseReport};
pub use tasks::{execute, run_tasks, settle, with_threads, FailurePolicy, Settled, TaskFailure, TaskId};
