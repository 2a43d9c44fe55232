//! Classifier evaluation against LIDAR ground truth
//!
//! A validation sample is drawn from the pool, every sampled tile is
//! predicted and compared with its ground-truth raster in parallel, and
//! the per-tile pair counts are reduced by task id into one confusion
//! matrix normalized over all compared pixels.

use crate::config::EvaluationParams;
use crate::core::confusion::{BinaryLabels, ConfusionMatrix, Metrics, PairCounts};
use crate::core::tasks::{run_tasks, with_threads, TaskFailure};
use crate::io::raster::RasterReader;
use crate::io::tile_list::SplitRecord;
use crate::types::{CanopyError, CanopyResult, Stage, TileContext};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::core::tasks::FailurePolicy;

/// Produces a label map with the shape of the tile it is given
pub trait Predictor: Send + Sync {
    fn predict(&self, tile: &Path) -> CanopyResult<Array2<u8>>;
}

/// Produces the observed label map of a tile
pub trait GroundTruth: Send + Sync {
    fn ground_truth(&self, tile: &Path) -> CanopyResult<Array2<u8>>;
}

pub type ClusterId = u32;

/// Predictor selection, chosen explicitly by the caller
#[derive(Clone)]
pub enum Classifier {
    /// One predictor for every tile; sampling is uniform with replacement
    Uniform(Arc<dyn Predictor>),
    /// One predictor per spatial cluster; the sample is drawn from the
    /// whole pool without replacement and grouped by cluster
    PerCluster(BTreeMap<ClusterId, Arc<dyn Predictor>>),
}

impl Classifier {
    fn predictor_for(&self, tile: &ValidationTile) -> CanopyResult<&dyn Predictor> {
        match self {
            Classifier::Uniform(predictor) => Ok(predictor.as_ref()),
            Classifier::PerCluster(predictors) => {
                let cluster = tile.cluster.ok_or_else(|| {
                    CanopyError::InvalidParameter(format!(
                        "Tile {} has no cluster assignment",
                        tile.path.display()
                    ))
                })?;
                predictors
                    .get(&cluster)
                    .map(|predictor| predictor.as_ref())
                    .ok_or_else(|| {
                        CanopyError::InvalidParameter(format!("No predictor for cluster {}", cluster))
                    })
            }
        }
    }
}

/// Reads precomputed predictions: the label raster with the tile's file
/// name inside `dir`
#[derive(Debug, Clone)]
pub struct RasterPredictor {
    dir: PathBuf,
}

impl RasterPredictor {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl Predictor for RasterPredictor {
    fn predict(&self, tile: &Path) -> CanopyResult<Array2<u8>> {
        let name = tile.file_name().ok_or_else(|| {
            CanopyError::InvalidParameter(format!("Tile path {} has no file name", tile.display()))
        })?;
        RasterReader::read_labels(self.dir.join(name))
    }
}

/// How many tiles to evaluate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleSize {
    Count(usize),
    /// Fraction of the pool in `[0, 1]`, rounded down
    Fraction(f64),
}

impl SampleSize {
    pub fn resolve(&self, pool_len: usize) -> CanopyResult<usize> {
        match *self {
            SampleSize::Count(count) => Ok(count),
            SampleSize::Fraction(fraction) if (0.0..=1.0).contains(&fraction) => {
                Ok((pool_len as f64 * fraction).floor() as usize)
            }
            SampleSize::Fraction(fraction) => Err(CanopyError::InvalidParameter(format!(
                "Sample fraction {} is outside [0, 1]",
                fraction
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTile {
    pub path: PathBuf,
    pub cluster: Option<ClusterId>,
}

/// Tiles held out for validation
#[derive(Debug, Clone, Default)]
pub struct ValidationPool {
    tiles: Vec<ValidationTile>,
}

impl ValidationPool {
    pub fn new(tiles: Vec<ValidationTile>) -> Self {
        Self { tiles }
    }

    /// Pool of unclustered tiles
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(
            paths
                .into_iter()
                .map(|path| ValidationTile { path: path.into(), cluster: None })
                .collect(),
        )
    }

    /// Validation rows of a split table (`train == false`)
    pub fn from_split_records(records: &[SplitRecord]) -> Self {
        Self::new(
            records
                .iter()
                .filter(|record| !record.train)
                .map(|record| ValidationTile {
                    path: record.img_filepath.clone(),
                    cluster: record.img_cluster,
                })
                .collect(),
        )
    }

    pub fn tiles(&self) -> &[ValidationTile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Result of an evaluation run
#[derive(Debug)]
pub struct Evaluation {
    pub matrix: ConfusionMatrix,
    pub metrics: Metrics,
    /// Sampled tiles that were compared, in sample order
    pub evaluated_tiles: Vec<PathBuf>,
    /// Sampled tiles skipped under [`FailurePolicy::SkipAndContinue`],
    /// identified by their position in the sample
    pub failures: Vec<TaskFailure>,
}

pub struct ConfusionEvaluator {
    params: EvaluationParams,
    labels: BinaryLabels,
    ground_truth: Arc<dyn GroundTruth>,
}

impl ConfusionEvaluator {
    pub fn new(params: EvaluationParams, labels: BinaryLabels, ground_truth: Arc<dyn GroundTruth>) -> Self {
        Self {
            params,
            labels,
            ground_truth,
        }
    }

    fn rng(&self) -> StdRng {
        match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Draw the validation sample for `classifier`, sized by the
    /// configured [`SampleSize`] resolved against the whole pool
    pub fn sample<'a>(
        &self,
        pool: &'a ValidationPool,
        classifier: &Classifier,
    ) -> CanopyResult<Vec<&'a ValidationTile>> {
        let count = self.params.sample_size.resolve(pool.len())?;
        let mut rng = self.rng();

        match classifier {
            Classifier::Uniform(_) => {
                if pool.is_empty() {
                    log::warn!("Validation pool is empty, nothing to sample");
                    return Ok(Vec::new());
                }
                Ok((0..count)
                    .map(|_| &pool.tiles[rng.gen_range(0..pool.len())])
                    .collect())
            }
            Classifier::PerCluster(_) => {
                for tile in &pool.tiles {
                    classifier.predictor_for(tile)?;
                }
                if count > pool.len() {
                    log::warn!(
                        "Validation pool has only {} tiles, {} requested",
                        pool.len(),
                        count
                    );
                }

                let mut clusters: BTreeMap<ClusterId, Vec<&ValidationTile>> = BTreeMap::new();
                for tile in pool.tiles.choose_multiple(&mut rng, count) {
                    if let Some(cluster) = tile.cluster {
                        clusters.entry(cluster).or_default().push(tile);
                    }
                }
                for (cluster, tiles) in &clusters {
                    log::debug!("Cluster {}: {} sampled tiles", cluster, tiles.len());
                }
                Ok(clusters.into_values().flatten().collect())
            }
        }
    }

    fn evaluate_tile(&self, tile: &ValidationTile, classifier: &Classifier) -> CanopyResult<PairCounts> {
        let name = tile.path.to_string_lossy();
        let predictor = classifier.predictor_for(tile).at_tile(&name, Stage::Classify)?;
        let predicted = predictor.predict(&tile.path).at_tile(&name, Stage::Classify)?;
        let observed = self
            .ground_truth
            .ground_truth(&tile.path)
            .at_tile(&name, Stage::GroundTruth)?;
        PairCounts::tabulate(&observed, &predicted, self.labels).at_tile(&name, Stage::Evaluate)
    }

    /// Evaluate `classifier` on a sample of `pool`
    pub fn evaluate(&self, pool: &ValidationPool, classifier: &Classifier) -> CanopyResult<Evaluation> {
        let sample = self.sample(pool, classifier)?;
        log::info!("Evaluating classifier on {} of {} validation tiles", sample.len(), pool.len());

        let settled = with_threads(self.params.num_threads, || {
            run_tasks(&sample, self.params.failure_policy, |tile| self.evaluate_tile(tile, classifier))
        })??;

        let evaluated_tiles = settled
            .completed
            .keys()
            .map(|&id| sample[id].path.clone())
            .collect();
        let counts: PairCounts = settled.completed.into_values().sum();
        let matrix = ConfusionMatrix::from_counts(counts);
        let metrics = matrix.metrics();

        log::info!("Compared {} pixels: {}", counts.total(), metrics);
        log::debug!("Confusion matrix:\n{}", matrix);
        if !settled.failures.is_empty() {
            log::warn!("{} sampled tiles failed and were skipped", settled.failures.len());
        }

        Ok(Evaluation {
            matrix,
            metrics,
            evaluated_tiles,
            failures: settled.failures,
        })
    }
}
