//! Boundary geometry providers
//!
//! Boundaries are resolved from a place-name query to polygons in the
//! tiles' coordinate reference system. No reprojection happens here.

use crate::types::{CanopyError, CanopyResult};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{BooleanOps, Geometry, MultiPolygon};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait BoundaryProvider: Send + Sync {
    fn resolve(&self, query: &str) -> CanopyResult<MultiPolygon<f64>>;
}

/// Resolve `target` and, when given, subtract the `excluded` geometry from it
pub fn target_minus_excluded(
    provider: &dyn BoundaryProvider,
    target: &str,
    excluded: Option<&str>,
) -> CanopyResult<MultiPolygon<f64>> {
    log::info!("Resolving boundary for `{}`", target);
    let geometry = provider.resolve(target)?;
    match excluded {
        Some(query) => {
            log::info!("Excluding boundary of `{}`", query);
            let excluded = provider.resolve(query)?;
            Ok(geometry.difference(&excluded))
        }
        None => Ok(geometry),
    }
}

/// Collapse polygonal geometries into a multipolygon; other kinds yield `None`
pub(crate) fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        Geometry::Rect(rect) => Some(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let polygons: Vec<_> = collection
                .into_iter()
                .filter_map(to_multipolygon)
                .flat_map(|multi| multi.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

/// Read every polygonal feature of the first layer of an OGR vector file,
/// paired with the string value of `name_field`
pub(crate) fn read_named_polygons<P: AsRef<Path>>(
    path: P,
    name_field: &str,
) -> CanopyResult<Vec<(String, MultiPolygon<f64>)>> {
    log::info!("Reading polygons from {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let mut layer = dataset.layer(0)?;
    let mut features = Vec::new();
    let mut skipped = 0usize;

    for feature in layer.features() {
        let name = feature.field_as_string_by_name(name_field)?.unwrap_or_default();
        let polygons = match feature.geometry() {
            Some(geometry) => to_multipolygon(geometry.to_geo()?),
            None => None,
        };
        match polygons {
            Some(polygons) => features.push((name, polygons)),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} features without polygon geometry", skipped);
    }
    log::debug!("Read {} polygonal features", features.len());
    Ok(features)
}

/// Boundaries looked up in a vector file by a name attribute
pub struct VectorFileBoundaries {
    path: PathBuf,
    name_field: String,
}

impl VectorFileBoundaries {
    pub fn new<P: Into<PathBuf>>(path: P, name_field: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name_field: name_field.into(),
        }
    }
}

impl BoundaryProvider for VectorFileBoundaries {
    /// Union of all features whose name contains `query`, ignoring case
    fn resolve(&self, query: &str) -> CanopyResult<MultiPolygon<f64>> {
        let needle = query.to_lowercase();
        let matching: Vec<MultiPolygon<f64>> = read_named_polygons(&self.path, &self.name_field)?
            .into_iter()
            .filter(|(name, _)| name.to_lowercase().contains(&needle))
            .map(|(_, polygons)| polygons)
            .collect();

        if matching.is_empty() {
            return Err(CanopyError::InvalidParameter(format!(
                "No feature of {} matches `{}`",
                self.path.display(),
                query
            )));
        }

        log::info!("Found {} features matching `{}`", matching.len(), query);
        Ok(matching
            .iter()
            .skip(1)
            .fold(matching[0].clone(), |acc, next| acc.union(next)))
    }
}

/// Boundaries held in memory, keyed by exact query
#[derive(Debug, Clone, Default)]
pub struct StaticBoundaries {
    entries: HashMap<String, MultiPolygon<f64>>,
}

impl StaticBoundaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        self.entries.insert(query.into(), geometry);
        self
    }
}

impl BoundaryProvider for StaticBoundaries {
    fn resolve(&self, query: &str) -> CanopyResult<MultiPolygon<f64>> {
        self.entries
            .get(query)
            .cloned()
            .ok_or_else(|| CanopyError::InvalidParameter(format!("Unknown boundary `{}`", query)))
    }
}
