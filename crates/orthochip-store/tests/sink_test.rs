//! Integration tests for tile output and batch log persistence

use geo::{polygon, Geometry};
use ndarray::{Array2, Array3};
use orthochip_core::models::{
    Affine, BatchLog, ClassCode, Crs, ImageChip, MaskChip, TileState, VectorExtract,
};
use orthochip_core::ports::{BatchLogStore, TileSink};
use orthochip_store::{read_geotiff, CsvBatchLogStore, FileTileSink};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn image() -> ImageChip {
    ImageChip {
        data: Array3::from_elem((4, 8, 8), 120),
        transform: Affine::north_up(400_000.0, 350_000.0, 1.6, 1.6),
        crs: Crs::austria_lambert(),
        nodata: 0,
        nodata_present: false,
    }
}

fn mask() -> MaskChip {
    let mut data = Array2::zeros((8, 8));
    data.slice_mut(ndarray::s![0..4, ..]).fill(1);
    MaskChip {
        data,
        transform: Affine::north_up(400_000.0, 350_000.0, 1.6, 1.6),
        crs: Crs::austria_lambert(),
        class_pixels: BTreeMap::from([(ClassCode::Ns41, 32)]),
        feature_count: 1,
    }
}

#[test]
fn test_file_sink_writes_named_outputs() {
    let dir = TempDir::new().unwrap();
    let sink = FileTileSink::new(dir.path()).unwrap();
    assert!(!sink.outputs_exist("t1"));

    sink.write_image("t1", &image()).unwrap();
    assert!(!sink.outputs_exist("t1"));
    sink.write_mask("t1", &mask()).unwrap();
    assert!(sink.outputs_exist("t1"));

    let (data, transform, crs) = read_geotiff(dir.path().join("input_t1.tif")).unwrap();
    assert_eq!(data.dim(), (4, 8, 8));
    assert_eq!(transform, image().transform);
    assert_eq!(crs.unwrap().epsg, 31287);

    let (mask_data, _, _) = read_geotiff(dir.path().join("target_t1.tif")).unwrap();
    assert_eq!(mask_data.iter().filter(|&&v| v == 1).count(), 32);
    assert!(!dir.path().join("input_t1.tif.tmp").exists());
}

#[test]
fn test_file_sink_writes_vector_extract() {
    let dir = TempDir::new().unwrap();
    let sink = FileTileSink::new(dir.path()).unwrap();
    let extract = VectorExtract {
        crs: Crs::austria_lambert(),
        features: vec![(
            ClassCode::Ns92,
            Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]),
        )],
    };
    sink.write_vector_extract("t2", &extract).unwrap();

    let body = std::fs::read_to_string(dir.path().join("target_t2.geojson")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["features"][0]["properties"]["NS"], 92);
    assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::31287");
}

#[test]
fn test_csv_batch_log_resumes_rows() {
    let dir = TempDir::new().unwrap();
    let store = CsvBatchLogStore::new(dir.path().join("statelog.csv"));

    let mut ok = TileState::new("a");
    ok.set_raster(true).unwrap();
    ok.set_vector(true).unwrap();
    ok.record_mask(BTreeMap::from([(ClassCode::Ns41, 16)]), 64, 2);

    let mut failed = TileState::new("b");
    failed.record_error("Point (1.000, 2.000) is outside catalog coverage, retry later");
    failed.set_raster(false).unwrap();

    let mut log = BatchLog::new();
    log.record(ok.summary());
    log.record(failed.summary());
    store.flush(&log).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.len(), 2);
    let a = loaded.get("a").unwrap();
    assert!(a.raster_ok && a.vector_ok);
    assert_eq!(a.feature_count, 2);
    assert_eq!(a.classes[&ClassCode::Ns41].pixels, 16);
    assert!((a.classes[&ClassCode::Ns41].fraction - 0.25).abs() < 1e-12);
    assert_eq!(a.classes[&ClassCode::Ns40].pixels, 0);

    let b = loaded.get("b").unwrap();
    assert!(!b.raster_ok && !b.vector_attempted);
    assert!(b.error.as_deref().unwrap().contains("retry later"));
    assert_eq!(loaded.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(!dir.path().join("statelog.csv.tmp").exists());
}
