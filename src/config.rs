//! Pipeline configuration
//!
//! All endpoints, directories and processing constants are carried in
//! explicit values handed to each component at construction.

use crate::core::evaluate::{FailurePolicy, SampleSize};
use crate::core::morphology::StructuringElement;
use crate::types::{CanopyResult, ClassificationCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ORTHOPHOTO_BASE_URI: &str = "https://maps.zh.ch/download/orthofoto/sommer/2014/rgb/jpeg/";
pub const LIDAR_BASE_URI: &str = "https://maps.zh.ch/download/hoehen/2014/lidar/";

/// Remote asset endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub orthophoto_base_uri: String,
    pub lidar_base_uri: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            orthophoto_base_uri: ORTHOPHOTO_BASE_URI.to_string(),
            lidar_base_uri: LIDAR_BASE_URI.to_string(),
            timeout_secs: 300,
        }
    }
}

/// Local directories mirroring remote file names, plus output directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDirs {
    pub raw_tiles_dir: PathBuf,
    pub lidar_dir: PathBuf,
    pub tiles_dir: PathBuf,
    pub response_dir: PathBuf,
}

impl CacheDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            raw_tiles_dir: root.join("raw").join("tiles"),
            lidar_dir: root.join("raw").join("lidar"),
            tiles_dir: root.join("interim").join("tiles"),
            response_dir: root.join("interim").join("response-tiles"),
        }
    }
}

impl Default for CacheDirs {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .map(|dir| dir.join("canopy"))
            .unwrap_or_else(|| PathBuf::from("data"));
        Self::under(&root)
    }
}

/// Orthophoto resampling and subdivision parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleParams {
    /// Integer downsampling factor applied to both axes
    pub resample_factor: usize,
    /// Output grid is `subdivisions` x `subdivisions` per source tile
    pub subdivisions: usize,
    /// Keep raw tiles after subdividing them
    pub keep_raw: bool,
    /// Extension of written output tiles (GeoTIFF)
    pub output_extension: String,
    pub failure_policy: FailurePolicy,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            resample_factor: 5,
            subdivisions: 5,
            keep_raw: false,
            output_extension: "tif".to_string(),
            failure_policy: FailurePolicy::Abort,
        }
    }
}

/// Ground-truth response raster parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseParams {
    /// Minimum count of high-vegetation returns for a canopy pixel
    pub threshold: u32,
    pub tree_value: u8,
    pub nodata_value: u8,
    /// The two high-vegetation classification codes
    pub high_vegetation_codes: (ClassificationCode, ClassificationCode),
    pub structuring_element: StructuringElement,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            threshold: 5,
            tree_value: 255,
            nodata_value: 0,
            high_vegetation_codes: (4, 5),
            structuring_element: StructuringElement::Cross,
        }
    }
}

/// Classifier evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationParams {
    /// Number of validation tiles drawn, resolved against the whole pool
    pub sample_size: SampleSize,
    /// Seed for validation sampling; `None` draws from entropy
    pub seed: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Worker threads; `None` uses the global rayon pool
    pub num_threads: Option<usize>,
}

impl Default for EvaluationParams {
    fn default() -> Self {
        Self {
            sample_size: SampleSize::Fraction(0.05),
            seed: None,
            failure_policy: FailurePolicy::Abort,
            num_threads: None,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub endpoints: EndpointConfig,
    pub dirs: CacheDirs,
    pub resample: ResampleParams,
    pub response: ResponseParams,
    pub evaluation: EvaluationParams,
}

impl PipelineConfig {
    /// Load a (possibly partial) JSON configuration; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CanopyResult<Self> {
        log::info!("Loading pipeline configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        log::debug!("Pipeline configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.resample.resample_factor, 5);
        assert_eq!(config.resample.subdivisions, 5);
        assert!(!config.resample.keep_raw);
        assert_eq!(config.response.threshold, 5);
        assert_eq!(config.response.tree_value, 255);
        assert_eq!(config.response.nodata_value, 0);
        assert_eq!(config.response.high_vegetation_codes, (4, 5));
        assert_eq!(config.endpoints.lidar_base_uri, LIDAR_BASE_URI);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "resample": { "resample_factor": 2 }, "endpoints": { "lidar_base_uri": "http://localhost/lidar/" } }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.resample.resample_factor, 2);
        assert_eq!(config.resample.subdivisions, 5);
        assert_eq!(config.endpoints.lidar_base_uri, "http://localhost/lidar/");
        assert_eq!(config.endpoints.orthophoto_base_uri, ORTHOPHOTO_BASE_URI);
        assert_eq!(config.response.threshold, 5);
    }

    #[test]
    fn test_evaluation_sample_size_from_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "evaluation": { "sample_size": { "Count": 12 }, "seed": 3 } }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.evaluation.sample_size, SampleSize::Count(12));
        assert_eq!(config.evaluation.seed, Some(3));
        assert_eq!(PipelineConfig::default().evaluation.sample_size, SampleSize::Fraction(0.05));
    }
}
