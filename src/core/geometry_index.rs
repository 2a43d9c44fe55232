//! Spatial index over named polygon footprints
//!
//! Used for LIDAR source footprints (which sources cover a tile?) and for
//! orthophoto tile indexes (which tiles lie inside a boundary?).

use crate::io::boundary::read_named_polygons;
use crate::types::{BoundingBox, CanopyResult};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Relate};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::path::Path;

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Named polygon footprint
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// Spatial relation used when selecting footprints against a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialPredicate {
    Within,
    Intersects,
}

pub struct GeometryIndex {
    footprints: Vec<Footprint>,
    tree: RTree<Envelope>,
}

impl GeometryIndex {
    pub fn new(footprints: Vec<Footprint>) -> Self {
        let envelopes: Vec<Envelope> = footprints
            .iter()
            .enumerate()
            .filter_map(|(i, footprint)| {
                let rect = footprint.geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    i,
                ))
            })
            .collect();

        log::debug!("Indexed {} footprints", envelopes.len());
        Self {
            footprints,
            tree: RTree::bulk_load(envelopes),
        }
    }

    /// Load footprints from an OGR vector file, naming each by `name_field`
    pub fn from_vector_file<P: AsRef<Path>>(path: P, name_field: &str) -> CanopyResult<Self> {
        let footprints = read_named_polygons(path, name_field)?
            .into_iter()
            .map(|(name, geometry)| Footprint { name, geometry })
            .collect();
        Ok(Self::new(footprints))
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    pub fn footprints(&self) -> &[Footprint] {
        &self.footprints
    }

    /// Candidate footprints whose envelope overlaps `rect`, in insertion order
    fn candidates(&self, rect: &BoundingBox) -> Vec<usize> {
        let envelope = AABB::from_corners([rect.min_x, rect.min_y], [rect.max_x, rect.max_y]);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Names of footprints intersecting a bounding box, in insertion order
    pub fn intersecting(&self, bbox: &BoundingBox) -> Vec<&str> {
        let query = bbox.to_rect().to_polygon();
        self.candidates(bbox)
            .into_iter()
            .map(|i| &self.footprints[i])
            .filter(|footprint| footprint.geometry.intersects(&query))
            .map(|footprint| footprint.name.as_str())
            .collect()
    }

    /// Names of footprints standing in `predicate` relation to `boundary`
    pub fn select(&self, boundary: &MultiPolygon<f64>, predicate: SpatialPredicate) -> Vec<&str> {
        let Some(rect) = boundary.bounding_rect() else {
            return Vec::new();
        };
        let extent = BoundingBox {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        };

        let selected: Vec<&str> = self
            .candidates(&extent)
            .into_iter()
            .map(|i| &self.footprints[i])
            .filter(|footprint| match predicate {
                SpatialPredicate::Within => footprint.geometry.relate(boundary).is_within(),
                SpatialPredicate::Intersects => footprint.geometry.intersects(boundary),
            })
            .map(|footprint| footprint.name.as_str())
            .collect();

        log::info!("Found {} footprints {:?} the boundary", selected.len(), predicate);
        selected
    }

    /// Union of all footprints
    pub fn union_all(&self) -> MultiPolygon<f64> {
        self.footprints
            .iter()
            .fold(MultiPolygon::new(Vec::new()), |acc, footprint| acc.union(&footprint.geometry))
    }

    /// Part of `boundary` not covered by any footprint
    pub fn uncovered(&self, boundary: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        boundary.difference(&self.union_all())
    }
}

/// Whether a tile's bounding box touches a boundary geometry
pub fn bbox_intersects(boundary: &MultiPolygon<f64>, bbox: &BoundingBox) -> bool {
    boundary.intersects(&bbox.to_rect().to_polygon())
}
