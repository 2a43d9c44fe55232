use crate::config::EndpointConfig;
use crate::io::cache::ArtifactCache;
use crate::io::remote::{asset_uri, RemoteFetcher};
use crate::types::{BoundingBox, CanopyResult, ClassificationCode, LidarPoint, LidarPointBatch};
use las::{Read, Reader};
use std::path::Path;
use std::sync::Arc;

/// Anything that can hand out the point batch of a named LIDAR source
pub trait PointSource: Send + Sync {
    fn fetch(&self, source_id: &str) -> CanopyResult<LidarPointBatch>;
}

/// Selects returns off tall vegetation.
///
/// A code matches when it equals exactly one of the two configured codes
/// (exclusive-or of the two equality tests). With two distinct codes this
/// is the same as matching either; with identical codes nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationPredicate {
    pub first: ClassificationCode,
    pub second: ClassificationCode,
}

impl ClassificationPredicate {
    pub fn new(codes: (ClassificationCode, ClassificationCode)) -> Self {
        Self { first: codes.0, second: codes.1 }
    }

    pub fn matches(&self, code: ClassificationCode) -> bool {
        (code == self.first) ^ (code == self.second)
    }
}

/// Keep the points matching `predicate` whose coordinates fall inside
/// `bounds` (edges included), preserving order
pub fn filter_points(
    batch: &LidarPointBatch,
    predicate: &ClassificationPredicate,
    bounds: &BoundingBox,
) -> LidarPointBatch {
    let points = batch
        .points
        .iter()
        .filter(|p| predicate.matches(p.classification) && bounds.contains(p.x, p.y))
        .copied()
        .collect();
    LidarPointBatch::new(batch.source_id.clone(), points)
}

/// LAS point source backed by a remote archive and a permanent local cache
pub struct LidarPointSource {
    base_uri: String,
    cache: Arc<dyn ArtifactCache>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl LidarPointSource {
    pub fn new(
        base_uri: impl Into<String>,
        cache: Arc<dyn ArtifactCache>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            base_uri: base_uri.into(),
            cache,
            fetcher,
        }
    }

    pub fn from_endpoints(
        endpoints: &EndpointConfig,
        cache: Arc<dyn ArtifactCache>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self::new(endpoints.lidar_base_uri.clone(), cache, fetcher)
    }

    /// Decode x, y and classification of every point in a LAS/LAZ file
    pub fn read_las<P: AsRef<Path>>(path: P, source_id: &str) -> CanopyResult<LidarPointBatch> {
        let mut reader = Reader::from_path(path.as_ref())?;
        let expected = reader.header().number_of_points() as usize;
        let mut points = Vec::with_capacity(expected);

        for point in reader.points() {
            let point = point?;
            points.push(LidarPoint {
                x: point.x,
                y: point.y,
                classification: u8::from(point.classification),
            });
        }

        log::debug!("Read {} points from {}", points.len(), source_id);
        Ok(LidarPointBatch::new(source_id, points))
    }
}

impl PointSource for LidarPointSource {
    fn fetch(&self, source_id: &str) -> CanopyResult<LidarPointBatch> {
        let uri = asset_uri(&self.base_uri, source_id);
        let fetcher = &self.fetcher;
        let entry = self
            .cache
            .get_or_compute(source_id, &mut |staging: &Path| fetcher.fetch_to(&uri, staging))?;

        if entry.hit {
            log::debug!("Using cached LIDAR source {}", entry.path.display());
        } else {
            log::info!("Fetched LIDAR source {} from {}", source_id, uri);
        }

        Self::read_las(&entry.path, source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cache::FileCache;
    use crate::types::CanopyError;
    use las::point::Classification;
    use las::{Header, Point, Write, Writer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn point(x: f64, y: f64, code: u8) -> LidarPoint {
        LidarPoint { x, y, classification: code }
    }

    #[test]
    fn test_predicate_is_exclusive_or() {
        let predicate = ClassificationPredicate::new((4, 5));
        assert!(predicate.matches(4));
        assert!(predicate.matches(5));
        assert!(!predicate.matches(2));
        assert!(!predicate.matches(6));

        let degenerate = ClassificationPredicate::new((5, 5));
        assert!(!degenerate.matches(5));
    }

    #[test]
    fn test_filter_points_bounds_inclusive() {
        let batch = LidarPointBatch::new(
            "src.las",
            vec![
                point(0.0, 0.0, 5),
                point(10.0, 10.0, 4),
                point(10.01, 5.0, 5),
                point(5.0, 5.0, 2),
                point(5.0, 5.0, 5),
            ],
        );
        let bounds = BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 10.0, max_y: 10.0 };
        let filtered = filter_points(&batch, &ClassificationPredicate::new((4, 5)), &bounds);

        assert_eq!(filtered.source_id, "src.las");
        assert_eq!(
            filtered.points,
            vec![point(0.0, 0.0, 5), point(10.0, 10.0, 4), point(5.0, 5.0, 5)]
        );
    }

    struct LasFetcher {
        calls: AtomicUsize,
    }

    impl RemoteFetcher for LasFetcher {
        fn fetch_to(&self, uri: &str, destination: &Path) -> CanopyResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(uri.ends_with("tile.las"));
            let mut writer = Writer::from_path(destination, Header::default())?;
            for (x, y, class) in [
                (1.0, 2.0, Classification::HighVegetation),
                (3.0, 4.0, Classification::Ground),
            ] {
                writer.write(Point {
                    x,
                    y,
                    z: 400.0,
                    classification: class,
                    ..Default::default()
                })?;
            }
            drop(writer);
            Ok(())
        }
    }

    struct OfflineFetcher;

    impl RemoteFetcher for OfflineFetcher {
        fn fetch_to(&self, uri: &str, _destination: &Path) -> CanopyResult<()> {
            Err(CanopyError::ResourceUnavailable {
                uri: uri.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    #[test]
    fn test_fetch_uses_cache_on_second_call() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FileCache::new(dir.path()).unwrap());
        let fetcher = Arc::new(LasFetcher { calls: AtomicUsize::new(0) });
        let source = LidarPointSource::new("http://localhost/lidar/", cache, fetcher.clone());

        let first = source.fetch("tile.las").unwrap();
        let second = source.fetch("tile.las").unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.points[0].classification, 5);
        assert_eq!(first.points[1].classification, 2);
        assert!((first.points[1].x - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fetch_failure_is_resource_unavailable() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FileCache::new(dir.path()).unwrap());
        let source = LidarPointSource::new("http://localhost/lidar/", cache, Arc::new(OfflineFetcher));

        let result = source.fetch("missing.las");
        assert!(matches!(result, Err(CanopyError::ResourceUnavailable { .. })));
    }
}
