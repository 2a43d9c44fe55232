use canopy::core::geometry_index::{GeometryIndex, SpatialPredicate};
use canopy::io::boundary::{target_minus_excluded, BoundaryProvider, VectorFileBoundaries};
use canopy::types::{BoundingBox, CanopyError};
use geo::{Area, Contains, Point};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// GeoJSON polygon feature covering [min_x, max_x] x [min_y, max_y]
fn square_feature(field: &str, name: &str, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> String {
    format!(
        r#"{{ "type": "Feature", "properties": {{ "{field}": "{name}" }},
             "geometry": {{ "type": "Polygon", "coordinates": [[
                 [{min_x}, {min_y}], [{max_x}, {min_y}], [{max_x}, {max_y}], [{min_x}, {max_y}], [{min_x}, {min_y}]
             ]] }} }}"#
    )
}

fn point_feature(field: &str, name: &str, x: f64, y: f64) -> String {
    format!(
        r#"{{ "type": "Feature", "properties": {{ "{field}": "{name}" }},
             "geometry": {{ "type": "Point", "coordinates": [{x}, {y}] }} }}"#
    )
}

fn write_collection(dir: &Path, name: &str, features: Vec<String>) -> PathBuf {
    let path = dir.join(name);
    let content = format!(
        r#"{{ "type": "FeatureCollection", "features": [{}] }}"#,
        features.join(",\n")
    );
    std::fs::write(&path, content).expect("Failed to write vector file");
    path
}

fn lidar_index(dir: &Path) -> PathBuf {
    write_collection(
        dir,
        "lidar_index.geojson",
        vec![
            square_feature("dateiname", "2680_1250.las", 0.0, 0.0, 10.0, 10.0),
            square_feature("dateiname", "2690_1250.las", 10.0, 0.0, 20.0, 10.0),
            point_feature("dateiname", "marker.las", 5.0, 5.0),
        ],
    )
}

fn municipalities(dir: &Path) -> PathBuf {
    write_collection(
        dir,
        "municipalities.geojson",
        vec![
            square_feature("name", "Zurich", 0.0, 0.0, 10.0, 10.0),
            square_feature("name", "ZURICH Nord", 10.0, 0.0, 20.0, 10.0),
            square_feature("name", "Winterthur", 50.0, 0.0, 60.0, 10.0),
        ],
    )
}

#[test]
fn test_geometry_index_from_vector_file() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let index = GeometryIndex::from_vector_file(lidar_index(dir.path()), "dateiname")
        .expect("Failed to load footprints");

    // the point feature has no polygon and is left out
    assert_eq!(index.len(), 2);
    let names: Vec<&str> = index.footprints().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["2680_1250.las", "2690_1250.las"]);

    let straddling = BoundingBox { min_x: 8.0, min_y: 2.0, max_x: 12.0, max_y: 4.0 };
    assert_eq!(index.intersecting(&straddling), vec!["2680_1250.las", "2690_1250.las"]);
    let east = BoundingBox { min_x: 12.0, min_y: 2.0, max_x: 14.0, max_y: 4.0 };
    assert_eq!(index.intersecting(&east), vec!["2690_1250.las"]);
    let outside = BoundingBox { min_x: 30.0, min_y: 30.0, max_x: 31.0, max_y: 31.0 };
    assert!(index.intersecting(&outside).is_empty());
}

#[test]
fn test_footprints_within_file_boundary() {
    let dir = TempDir::new().unwrap();
    let index = GeometryIndex::from_vector_file(lidar_index(dir.path()), "dateiname").unwrap();
    let boundaries = VectorFileBoundaries::new(municipalities(dir.path()), "name");

    let zurich = boundaries.resolve("Zurich Nord").expect("Failed to resolve boundary");
    assert_eq!(index.select(&zurich, SpatialPredicate::Within), vec!["2690_1250.las"]);
    assert_eq!(
        index.select(&zurich, SpatialPredicate::Intersects),
        vec!["2680_1250.las", "2690_1250.las"]
    );
}

#[test]
fn test_boundary_query_unions_case_insensitive_matches() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let boundaries = VectorFileBoundaries::new(municipalities(dir.path()), "name");

    let zurich = boundaries.resolve("zurich").expect("Failed to resolve boundary");
    assert!((zurich.unsigned_area() - 200.0).abs() < 1e-9);
    assert!(zurich.contains(&Point::new(5.0, 5.0)));
    assert!(zurich.contains(&Point::new(15.0, 5.0)));
    assert!(!zurich.contains(&Point::new(55.0, 5.0)));

    let city = target_minus_excluded(&boundaries, "zurich", Some("nord")).expect("Failed to subtract boundary");
    assert!((city.unsigned_area() - 100.0).abs() < 1e-9);
    assert!(!city.contains(&Point::new(15.0, 5.0)));
}

#[test]
fn test_unmatched_boundary_query_is_invalid() {
    let dir = TempDir::new().unwrap();
    let boundaries = VectorFileBoundaries::new(municipalities(dir.path()), "name");

    match boundaries.resolve("Basel") {
        Err(CanopyError::InvalidParameter(message)) => assert!(message.contains("Basel"), "{}", message),
        other => panic!("unexpected result: {:?}", other.map(|g| g.0.len())),
    }
}
