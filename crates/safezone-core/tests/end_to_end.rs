//! Both pipeline variants, from files on disk to published products.

use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use geo::polygon;
use safezone_core::crs::transform;
use safezone_core::io::{read_raster, read_zone, write_raster};
use safezone_core::outputs::{PSSD_FILE, SAFEST_POINT_FILE, SEGMENTS_FILE, SSD_FILE, SSD_MET_FILE};
use safezone_core::{
    BurnCondition, CellKind, Crs, Extent, OutputPaths, PipelineConfig, Raster, SafetyZone,
    SsdError, SsdPipeline, WindClass,
};

const CELL: f64 = 30.0;
const N: usize = 31;
const X0: f64 = 400_000.0;
const Y0: f64 = 4_000_000.0;

fn utm12() -> Crs {
    Crs::from_epsg(26912).unwrap()
}

fn grid(fill: f32) -> Raster {
    let extent = Extent::new(X0, Y0, X0 + N as f64 * CELL, Y0 + N as f64 * CELL);
    Raster::new(N, N, extent, Some(utm12()), fill)
}

/// Writes flat terrain and uniform vegetation code rasters.
fn write_inputs(dir: &Path, code: f32) {
    write_raster(&dir.join("evh.tif"), &grid(code).as_kind(CellKind::Integer)).unwrap();
    write_raster(&dir.join("dtm.tif"), &grid(1500.0)).unwrap();
}

/// 5×5-cell square whose edges follow cell boundaries (rows/cols 13..18).
fn write_zone(dir: &Path, min_x: f64) {
    let top = Y0 + N as f64 * CELL;
    let (x0, x1) = (min_x, min_x + 5.0 * CELL);
    let (y0, y1) = (top - 18.0 * CELL, top - 13.0 * CELL);
    let text = format!(
        r#"{{
            "type": "FeatureCollection",
            "crs": {{ "type": "name", "properties": {{ "name": "EPSG:26912" }} }},
            "features": [{{
                "type": "Feature",
                "properties": {{}},
                "geometry": {{
                    "type": "Polygon",
                    "coordinates": [[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]
                }}
            }}]
        }}"#
    );
    fs::write(dir.join("zone.geojson"), text).unwrap();
}

fn centred_zone_x() -> f64 {
    X0 + 13.0 * CELL
}

#[test]
fn flat_forest_gives_uniform_320m_ssd() {
    let input = tempfile::tempdir().unwrap();
    write_inputs(input.path(), 150.0);
    let veg = read_raster(&input.path().join("evh.tif")).unwrap();
    let dtm = read_raster(&input.path().join("dtm.tif")).unwrap();

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    let wind: WindClass = "Light (0-10 mph)".parse().unwrap();
    let burn: BurnCondition = "Low".parse().unwrap();
    let products = pipeline.run_ssd(&veg, &dtm, wind, burn).unwrap();

    assert_eq!(products.context.crs, utm12());
    assert!(
        products.ssd.data.iter().all(|&v| v == 320.0),
        "every cell must be 8 × 50 m × 0.8"
    );

    let out = tempfile::tempdir().unwrap();
    let paths = OutputPaths::for_run(out.path(), "ssd-run").unwrap();
    products.publish(paths.clone()).unwrap();
    let written = read_raster(&paths.file(SSD_FILE)).unwrap();
    assert_eq!(written.crs, Some(utm12()));
    assert_eq!(written.max_value(), Some(320.0));
}

#[test]
fn extended_run_finds_the_zone_centre() {
    let input = tempfile::tempdir().unwrap();
    // Code 105 = 5 m; Light/Low on flat ground = 0.8 → SSD 32 m.
    write_inputs(input.path(), 105.0);
    write_zone(input.path(), centred_zone_x());

    let veg = read_raster(&input.path().join("evh.tif")).unwrap();
    let dtm = read_raster(&input.path().join("dtm.tif")).unwrap();
    let zone = read_zone(&input.path().join("zone.geojson")).unwrap();

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    let p = pipeline
        .run_ssde(&zone, &veg, &dtm, WindClass::Light, BurnCondition::Low)
        .unwrap();

    assert_eq!(p.donuts.max_ssd, 32.0);
    assert_eq!(p.donuts.shrink_donut.distance_m, 32.0);
    // The 32 m donut is the single ring of 24 cells around the zone.
    assert_eq!(p.segment_count, 1);
    assert_eq!(p.segments.valid_count(), 24);

    // 5×5 window: edge 30/32, next ring 60/32, centre 90/32.
    let m = &p.minimum_pssd;
    assert_eq!((m.width, m.height), (5, 5));
    assert_relative_eq!(m.get(0, 0), 0.9375, epsilon = 1e-6);
    assert_relative_eq!(m.get(1, 2), 1.875, epsilon = 1e-6);
    assert_relative_eq!(m.get(2, 2), 2.8125, epsilon = 1e-6);

    assert_eq!(p.compliance.get(0, 3), 0.0);
    assert_eq!(p.compliance.get(1, 1), 1.0);
    assert_eq!(p.compliance.get(2, 2), 1.0);

    let sp = p.safest_point;
    assert_eq!((sp.row, sp.col, sp.tied_cells), (2, 2, 1));
    assert_relative_eq!(sp.x, X0 + 15.5 * CELL, epsilon = 1e-6);
    assert_relative_eq!(sp.y, Y0 + N as f64 * CELL - 15.5 * CELL, epsilon = 1e-6);

    // Publication.
    let out = tempfile::tempdir().unwrap();
    let paths = OutputPaths::for_run(out.path(), "ssde-test").unwrap();
    p.publish(paths.clone(), true).unwrap();
    for f in [PSSD_FILE, SSD_MET_FILE, SAFEST_POINT_FILE, SSD_FILE, SEGMENTS_FILE] {
        assert!(paths.file(f).is_file(), "{f} missing");
    }
    let met = read_raster(&paths.file(SSD_MET_FILE)).unwrap();
    assert_eq!(met.kind, CellKind::Integer);
    let point: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(paths.file(SAFEST_POINT_FILE)).unwrap()).unwrap();
    assert_eq!(point["features"].as_array().map(Vec::len), Some(1));

    // Same run name again is refused.
    assert!(matches!(
        OutputPaths::for_run(out.path(), "ssde-test"),
        Err(SsdError::OutputExists(_))
    ));
}

#[test]
fn zone_beyond_raster_is_a_coverage_error() {
    let input = tempfile::tempdir().unwrap();
    write_inputs(input.path(), 105.0);
    write_zone(input.path(), X0 + 28.0 * CELL);
    let veg = read_raster(&input.path().join("evh.tif")).unwrap();
    let dtm = read_raster(&input.path().join("dtm.tif")).unwrap();
    let zone = read_zone(&input.path().join("zone.geojson")).unwrap();

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    let err = pipeline
        .run_ssde(&zone, &veg, &dtm, WindClass::High, BurnCondition::Extreme)
        .unwrap_err();
    assert!(matches!(err, SsdError::ExtentCoverage { .. }), "got {err}");
}

#[test]
fn treeless_surroundings_have_no_segments() {
    let input = tempfile::tempdir().unwrap();
    // Code 50: sparse cover, zero height, zero SSD.
    write_inputs(input.path(), 50.0);
    write_zone(input.path(), centred_zone_x());
    let veg = read_raster(&input.path().join("evh.tif")).unwrap();
    let dtm = read_raster(&input.path().join("dtm.tif")).unwrap();
    let zone = read_zone(&input.path().join("zone.geojson")).unwrap();

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    assert!(matches!(
        pipeline.run_ssde(&zone, &veg, &dtm, WindClass::Light, BurnCondition::Low),
        Err(SsdError::NoSegments)
    ));
}

#[test]
fn raster_without_georeferencing_keys_cannot_be_harmonised() {
    let mut veg = grid(150.0);
    veg.crs = None;
    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    assert!(matches!(
        pipeline.run_ssd(&veg, &grid(0.0), WindClass::Moderate, BurnCondition::Moderate),
        Err(SsdError::CoordinateResolution(_))
    ));
}

#[test]
fn nodata_terrain_gives_nodata_ssd() {
    let veg = grid(150.0).as_kind(CellKind::Integer);
    let mut dtm = grid(1500.0);
    dtm.set(5, 5, f32::NAN);

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    let products = pipeline
        .run_ssd(&veg, &dtm, WindClass::Light, BurnCondition::Low)
        .unwrap();
    assert!(products.ssd.get(5, 5).is_nan());
    assert_eq!(products.ssd.valid_count(), N * N - 1);
    assert!(products.ssd.valid_values().all(|v| v == 320.0));
}

#[test]
fn nodata_terrain_in_the_donut_is_left_out_of_the_segment() {
    let input = tempfile::tempdir().unwrap();
    write_zone(input.path(), centred_zone_x());
    let zone = read_zone(&input.path().join("zone.geojson")).unwrap();
    let veg = grid(105.0).as_kind(CellKind::Integer);
    let mut dtm = grid(1500.0);
    // Directly above the zone, inside the 32 m ring.
    dtm.set(12, 15, f32::NAN);

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();
    let p = pipeline
        .run_ssde(&zone, &veg, &dtm, WindClass::Light, BurnCondition::Low)
        .unwrap();

    assert!(p.ssd.get(12, 15).is_nan());
    assert_eq!(p.donuts.max_ssd, 32.0);
    assert_eq!(p.segment_count, 1);
    assert_eq!(p.segments.valid_count(), 23);
    assert_relative_eq!(p.minimum_pssd.get(2, 2), 2.8125, epsilon = 1e-6);
    assert_eq!(p.safest_point.value, p.minimum_pssd.get(2, 2));
}

#[test]
fn albers_inputs_are_harmonised_onto_utm() {
    let utm = utm12();
    let albers = Crs::from_epsg(5070).unwrap();
    // Working-grid centre, on 30 m multiples in UTM zone 12.
    let (ux, uy) = (450_000.0, 3_996_000.0);
    let (ax, ay) = transform(&utm, &albers, ux, uy).unwrap();

    let half = 30.5 * CELL;
    let extent = Extent::new(ax - half, ay - half, ax + half, ay + half);
    let input = tempfile::tempdir().unwrap();
    write_raster(
        &input.path().join("evh.tif"),
        &Raster::new(61, 61, extent, Some(albers), 105.0).as_kind(CellKind::Integer),
    )
    .unwrap();
    write_raster(&input.path().join("dtm.tif"), &Raster::new(61, 61, extent, Some(albers), 1500.0)).unwrap();
    let veg = read_raster(&input.path().join("evh.tif")).unwrap();
    let dtm = read_raster(&input.path().join("dtm.tif")).unwrap();
    assert_eq!(veg.crs, Some(albers));

    let pipeline = SsdPipeline::new(PipelineConfig::default()).unwrap();

    let simple = pipeline
        .run_ssd(&veg, &dtm, WindClass::Light, BurnCondition::Low)
        .unwrap();
    assert_eq!(simple.context.crs, utm);
    assert_eq!(simple.ssd.cell_size(), (CELL, CELL));
    assert_eq!(simple.ssd.max_value(), Some(32.0));

    // 5×5-cell zone centred on the grid centre.
    let (x0, y0) = (ux - 60.0, uy - 60.0);
    let (x1, y1) = (x0 + 5.0 * CELL, y0 + 5.0 * CELL);
    let zone = SafetyZone::new(
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)],
        Some(utm),
    );
    let p = pipeline
        .run_ssde(&zone, &veg, &dtm, WindClass::Light, BurnCondition::Low)
        .unwrap();

    assert_eq!(p.context.crs, utm);
    assert_eq!(p.donuts.max_ssd, 32.0);
    assert_eq!(p.segment_count, 1);
    assert_eq!(p.segments.valid_count(), 24);
    assert_eq!((p.minimum_pssd.width, p.minimum_pssd.height), (5, 5));
    let sp = p.safest_point;
    assert_eq!((sp.row, sp.col, sp.tied_cells), (2, 2, 1));
    assert_relative_eq!(sp.value, 2.8125, epsilon = 1e-6);
    assert_relative_eq!(sp.x, x0 + 2.5 * CELL, epsilon = 1e-6);
    assert_relative_eq!(sp.y, y0 + 2.5 * CELL, epsilon = 1e-6);

    let out = tempfile::tempdir().unwrap();
    let paths = OutputPaths::for_run(out.path(), "albers").unwrap();
    p.publish(paths.clone(), false).unwrap();
    assert_eq!(read_raster(&paths.file(PSSD_FILE)).unwrap().crs, Some(utm));
}
