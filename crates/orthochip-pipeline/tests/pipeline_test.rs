//! End-to-end tile and batch tests over in-memory adapters

use chrono::NaiveDate;
use geo::{polygon, Geometry, MultiPolygon};
use ndarray::{s, Array3};
use orthochip_core::models::{
    Affine, BatchLog, CatalogEntry, ChipSpec, ClassCode, Crs, ExecutionMode, NodataPolicy,
    OverviewLevel, TileRequest, VectorFeature,
};
use orthochip_core::ports::{BatchLogStore, RasterHandle, RasterSource, TileSink};
use orthochip_core::{OrthochipError, Result};
use orthochip_geo::{CatalogIndex, CoordinateResolver};
use orthochip_pipeline::{
    BatchOptions, BatchOrchestrator, QueryPoint, TilePipeline, TileSources,
};
use orthochip_store::{
    MemoryBatchLogStore, MemoryRasterSource, MemoryTileSink, MemoryTransformer, MemoryVectorSource,
};
use serde_json::json;
use std::sync::Arc;

/// Sheet covering x, y in [0, 1600] m of Austria Lambert at 1.6 m
const SHEET_SIZE: usize = 1000;
const ORIGIN_Y: f64 = 1600.0;

struct Fixture {
    raster: MemoryRasterSource,
    vector: MemoryVectorSource,
    sink: MemoryTileSink,
    resolver: CoordinateResolver,
}

fn square(x0: f64, y0: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: x0, y: y0),
        (x: x0 + size, y: y0),
        (x: x0 + size, y: y0 + size),
        (x: x0, y: y0 + size),
    ])
}

fn feature(code: u16, geometry: Geometry<f64>) -> VectorFeature {
    let mut properties = serde_json::Map::new();
    properties.insert("NS".to_string(), json!(code));
    VectorFeature { geometry, properties }
}

fn rgb_pixels() -> Array3<u8> {
    Array3::from_shape_fn((3, SHEET_SIZE, SHEET_SIZE), |(b, r, c)| {
        (1 + (r * 3 + c * 7 + b * 11) % 250) as u8
    })
}

fn nir_pixels() -> Array3<u8> {
    Array3::from_shape_fn((1, SHEET_SIZE, SHEET_SIZE), |(_, r, c)| (1 + (r + c) % 200) as u8)
}

/// Query degrees map to 1000 m so query points stay readable
fn degree_transformer() -> MemoryTransformer {
    MemoryTransformer::new().with_mapping(
        &Crs::wgs84(),
        &Crs::austria_lambert(),
        Affine::new(1000.0, 0.0, 0.0, 0.0, 1000.0, 0.0),
    )
}

fn fixture() -> Fixture {
    fixture_with(degree_transformer())
}

fn fixture_with(transformer: MemoryTransformer) -> Fixture {
    let lambert = Crs::austria_lambert();
    let transform = Affine::north_up(0.0, ORIGIN_Y, 1.6, 1.6);
    let level = OverviewLevel::new(2).unwrap();

    let raster = MemoryRasterSource::new();
    raster.insert("rgb_a", level, transform, lambert.clone(), rgb_pixels());
    raster.insert("nir_a", level, transform, lambert.clone(), nir_pixels());

    let vector = MemoryVectorSource::new();
    vector.insert(
        "kataster_20210401",
        lambert.clone(),
        vec![
            feature(41, square(700.0, 700.0, 200.0)),
            feature(92, square(760.0, 760.0, 20.0)),
            feature(83, square(800.0, 800.0, 50.0)),
            feature(41, square(1500.0, 1500.0, 50.0)),
        ],
    );

    let entry = CatalogEntry {
        sheet_id: "A".to_string(),
        coverage: MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1600.0, y: 0.0),
            (x: 1600.0, y: 1600.0),
            (x: 0.0, y: 1600.0),
        ]]),
        rgb_locator: "rgb_a".to_string(),
        nir_locator: Some("nir_a".to_string()),
        vector_locator: "kataster_{epoch}".to_string(),
        valid_from: NaiveDate::from_ymd_opt(2021, 6, 15).unwrap(),
    };
    let catalog = CatalogIndex::new(lambert.clone(), vec![entry]);
    let resolver = CoordinateResolver::new(Arc::new(catalog), Arc::new(transformer), Crs::wgs84());

    Fixture { raster, vector, sink: MemoryTileSink::new(), resolver }
}

impl Fixture {
    fn pipeline(&self) -> TilePipeline {
        TilePipeline::new(
            TileSources {
                resolver: self.resolver.clone(),
                raster: Arc::new(self.raster.clone()),
                vector: Arc::new(self.vector.clone()),
                sink: Arc::new(self.sink.clone()),
            },
            "NS",
        )
    }
}

fn spec(shape: [usize; 3], policy: NodataPolicy) -> Arc<ChipSpec> {
    Arc::new(
        ChipSpec::builder(1.6, shape)
            .classes([41, 92])
            .nodata_policy(policy)
            .nodata_value(255)
            .write_vector_extract(true)
            .outpath("/tmp/orthochip")
            .build()
            .unwrap(),
    )
}

fn request(id: &str, lon: f64, lat: f64, spec: &Arc<ChipSpec>) -> TileRequest {
    TileRequest::new(id, lon, lat, Arc::clone(spec)).unwrap()
}

#[test]
fn test_full_coverage_rgbn_chip_and_mask_align() {
    let fx = fixture();
    let spec = spec([4, 512, 512], NodataPolicy::Flag);
    let state = fx.pipeline().process(&request("t1", 0.8, 0.8, &spec));

    assert!(state.raster_ok(), "{:?}", state.error());
    assert!(state.vector_ok());
    assert!(!state.nodata_present());

    let chip = fx.sink.image("t1").unwrap();
    let mask = fx.sink.mask("t1").unwrap();
    assert_eq!(chip.data.dim(), (4, 512, 512));
    assert_eq!(mask.data.dim(), (512, 512));
    assert_eq!(chip.transform, mask.transform);
    assert_eq!(chip.crs, mask.crs);

    // Point (800, 800) falls in pixel (500, 500); origin = 500 - 256
    assert!((chip.transform.c - 244.0 * 1.6).abs() < 1e-9);
    assert!((chip.transform.f - (ORIGIN_Y - 244.0 * 1.6)).abs() < 1e-9);
    assert_eq!(chip.data.slice(s![..3, .., ..]), rgb_pixels().slice(s![.., 244..756, 244..756]));
    assert_eq!(chip.data.slice(s![3..4, .., ..]), nir_pixels().slice(s![.., 244..756, 244..756]));

    assert_eq!(mask.data[[256, 256]], 1);
    assert_eq!(mask.data[[0, 0]], 0);
    assert!(mask.class_pixels[&ClassCode::Ns41] > 15_000);
    assert!(mask.class_pixels[&ClassCode::Ns92] > 0);
    assert!(!mask.class_pixels.contains_key(&ClassCode::Ns83));
    assert_eq!(mask.feature_count, 2);

    let extract = fx.sink.extract("t1").unwrap();
    assert_eq!(extract.features.len(), 2);

    let summary = state.summary();
    assert_eq!(summary.classes.len(), ClassCode::ALL.len());
    assert_eq!(summary.classes[&ClassCode::Ns40].pixels, 0);
}

#[test]
fn test_out_of_coverage_writes_nothing() {
    let fx = fixture();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);
    let state = fx.pipeline().process(&request("far", 5.0, 5.0, &spec));

    assert!(!state.raster_ok());
    assert!(!state.vector_attempted());
    assert!(state.error().unwrap().contains("outside catalog coverage"));
    assert_eq!(fx.sink.writes(), 0);
    assert_eq!(fx.raster.opens(), 0);
}

#[test]
fn test_half_outside_window_is_padded_under_flag() {
    let fx = fixture();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);
    // x = 0.1 m lands in column 0, so columns -32..0 lie outside the sheet
    let state = fx.pipeline().process(&request("edge", 0.0001, 0.8, &spec));

    assert!(state.raster_ok());
    assert!(state.vector_ok());
    assert!(state.nodata_present());

    let chip = fx.sink.image("edge").unwrap();
    let mask = fx.sink.mask("edge").unwrap();
    assert_eq!(chip.data.dim(), (3, 64, 64));
    assert!(chip.data.slice(s![.., .., ..32]).iter().all(|&v| v == 255));
    assert!(chip.data.slice(s![.., .., 32..]).iter().all(|&v| v != 255));
    assert!(chip.nodata_present);
    assert_eq!(chip.transform, mask.transform);
    assert!((chip.transform.c + 32.0 * 1.6).abs() < 1e-9);
}

#[test]
fn test_half_outside_window_is_removed_under_remove() {
    let fx = fixture();
    let spec = spec([3, 64, 64], NodataPolicy::Remove);
    let state = fx.pipeline().process(&request("edge", 0.0001, 0.8, &spec));

    assert!(!state.raster_ok());
    assert!(!state.vector_attempted());
    assert!(fx.sink.image("edge").is_none());
    assert!(fx.sink.mask("edge").is_none());
    assert_eq!(fx.sink.writes(), 0);
    assert_eq!(fx.vector.opens(), 0);
}

#[test]
fn test_empty_vector_match_is_success() {
    let fx = fixture();
    let spec = spec([3, 32, 32], NodataPolicy::Flag);
    // Around (200, 200): no cadastre features nearby
    let state = fx.pipeline().process(&request("empty", 0.2, 0.2, &spec));

    assert!(state.vector_ok());
    let mask = fx.sink.mask("empty").unwrap();
    assert_eq!(mask.data.dim(), (32, 32));
    assert_eq!(mask.foreground_pixels(), 0);
    assert_eq!(mask.feature_count, 0);
}

#[test]
fn test_resampled_chip_shares_output_grid_with_mask() {
    let fx = fixture();
    let spec = Arc::new(
        ChipSpec::builder(1.6, [3, 32, 32])
            .resample_size(Some(2.4))
            .classes([41])
            .outpath("/tmp/orthochip")
            .build()
            .unwrap(),
    );
    let state = fx.pipeline().process(&request("coarse", 0.8, 0.8, &spec));
    assert!(state.raster_ok() && state.vector_ok(), "{:?}", state.error());

    let chip = fx.sink.image("coarse").unwrap();
    let mask = fx.sink.mask("coarse").unwrap();
    assert_eq!(chip.data.dim(), (3, 32, 32));
    assert_eq!(mask.data.dim(), (32, 32));
    assert_eq!(chip.transform, mask.transform);
    let (px, py) = chip.transform.pixel_size();
    assert!((px - 2.4).abs() < 1e-9 && (py - 2.4).abs() < 1e-9);
    // The whole 76.8 m footprint lies inside the 200 m NS 41 parcel
    assert_eq!(mask.foreground_pixels(), 32 * 32);
}

#[test]
fn test_missing_overview_is_tile_failure() {
    let fx = fixture();
    let spec = Arc::new(
        ChipSpec::builder(0.8, [3, 16, 16]).classes([41]).outpath("/tmp/orthochip").build().unwrap(),
    );
    let state = fx.pipeline().process(&request("fine", 0.8, 0.8, &spec));
    assert!(!state.raster_ok());
    assert!(state.error().unwrap().contains("rgb_a"));
}

#[test]
fn test_imagery_in_other_crs_is_read_at_reprojected_point() {
    // Imagery in EPSG:3416 sits 10 km east of the catalog frame
    let other = Crs::from_epsg(3416);
    let fx = fixture_with(degree_transformer().with_mapping(
        &Crs::austria_lambert(),
        &other,
        Affine::new(1.0, 0.0, 10_000.0, 0.0, 1.0, 0.0),
    ));
    let level = OverviewLevel::new(2).unwrap();
    let shifted = Affine::north_up(10_000.0, ORIGIN_Y, 1.6, 1.6);
    fx.raster.insert("rgb_a", level, shifted, other.clone(), rgb_pixels());
    fx.raster.insert("nir_a", level, shifted, other.clone(), nir_pixels());

    let spec = spec([4, 128, 128], NodataPolicy::Flag);
    let state = fx.pipeline().process(&request("moved", 0.8, 0.8, &spec));

    assert!(state.raster_ok(), "{:?}", state.error());
    assert!(state.vector_ok(), "{:?}", state.error());
    assert!(!state.nodata_present());

    let chip = fx.sink.image("moved").unwrap();
    let mask = fx.sink.mask("moved").unwrap();
    assert_eq!(chip.crs, other);
    assert_eq!(chip.transform, mask.transform);
    // (800, 800) in the catalog frame is (10800, 800), pixel (500, 500); origin = 500 - 64
    assert!((chip.transform.c - (10_000.0 + 436.0 * 1.6)).abs() < 1e-9);
    assert_eq!(chip.data.slice(s![..3, .., ..]), rgb_pixels().slice(s![.., 436..564, 436..564]));

    // Parcel 41 covers 700..900 in the catalog frame, so the chip centre is burned
    assert_eq!(mask.data[[64, 64]], 1);
}

#[test]
fn test_nir_with_smaller_extent_on_same_grid_is_stacked() {
    let fx = fixture();
    let transform = Affine::north_up(0.0, ORIGIN_Y, 1.6, 1.6);
    let nir = nir_pixels().slice(s![.., ..800, ..800]).to_owned();
    fx.raster.insert(
        "nir_a",
        OverviewLevel::new(2).unwrap(),
        transform,
        Crs::austria_lambert(),
        nir.clone(),
    );

    let spec = spec([4, 512, 512], NodataPolicy::Flag);
    let state = fx.pipeline().process(&request("nir", 0.8, 0.8, &spec));

    assert!(state.raster_ok(), "{:?}", state.error());
    assert!(!state.nodata_present());
    let chip = fx.sink.image("nir").unwrap();
    assert_eq!(chip.data.slice(s![3..4, .., ..]), nir.slice(s![.., 244..756, 244..756]));
}

#[test]
fn test_nir_on_shifted_grid_fails_tile() {
    let fx = fixture();
    fx.raster.insert(
        "nir_a",
        OverviewLevel::new(2).unwrap(),
        Affine::north_up(0.8, ORIGIN_Y, 1.6, 1.6),
        Crs::austria_lambert(),
        nir_pixels(),
    );

    let spec = spec([4, 64, 64], NodataPolicy::Flag);
    let state = fx.pipeline().process(&request("misaligned", 0.8, 0.8, &spec));

    assert!(!state.raster_ok());
    assert!(state.error().unwrap().contains("does not align"));
}

fn points() -> Vec<QueryPoint> {
    [("a", 0.8, 0.8), ("b", 0.5, 1.0), ("far", 9.0, 9.0), ("c", 1.2, 0.4), ("bad", 0.8, 95.0)]
        .iter()
        .map(|&(id, lon, lat)| QueryPoint { id: id.to_string(), lat, lon })
        .collect()
}

fn orchestrator(fx: &Fixture, store: &MemoryBatchLogStore, mode: ExecutionMode) -> BatchOrchestrator {
    BatchOrchestrator::new(
        fx.pipeline(),
        Arc::new(store.clone()),
        BatchOptions { mode, workers: Some(3), flush_every: 2 },
    )
    .unwrap()
}

#[test]
fn test_sequential_batch_logs_every_point() {
    let fx = fixture();
    let store = MemoryBatchLogStore::new();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);

    let mut seen = Vec::new();
    let report = orchestrator(&fx, &store, ExecutionMode::Sequential)
        .run_points(&points(), &spec, |p| seen.push(p))
        .unwrap();

    assert_eq!(report.progress.total, 5);
    assert_eq!(report.progress.processed, 5);
    assert_eq!(report.progress.failed, 2);
    assert_eq!(seen.len(), 5);
    assert!(report.flushes >= 3);

    let log = store.snapshot();
    assert_eq!(log.len(), 5);
    assert!(log.get("a").unwrap().vector_ok);
    assert!(!log.get("far").unwrap().raster_ok);
    assert!(log.get("bad").unwrap().error.is_some());
    assert_eq!(log.counts().failed, 2);
}

#[test]
fn test_parallel_batch_matches_sequential() {
    let spec = spec([3, 64, 64], NodataPolicy::Flag);

    let seq_fx = fixture();
    let seq_store = MemoryBatchLogStore::new();
    orchestrator(&seq_fx, &seq_store, ExecutionMode::Sequential)
        .run_points(&points(), &spec, |_| {})
        .unwrap();

    let par_fx = fixture();
    let par_store = MemoryBatchLogStore::new();
    let report = orchestrator(&par_fx, &par_store, ExecutionMode::Parallel)
        .run_points(&points(), &spec, |_| {})
        .unwrap();
    assert_eq!(report.workers, 3);

    let seq = seq_store.snapshot();
    let par = par_store.snapshot();
    assert_eq!(par.len(), seq.len());
    for row in seq.iter() {
        assert_eq!(par.get(&row.id), Some(row));
    }
    assert_eq!(par_fx.sink.image("c"), seq_fx.sink.image("c"));
}

#[test]
fn test_rerun_is_idempotent() {
    let fx = fixture();
    let store = MemoryBatchLogStore::new();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);

    orchestrator(&fx, &store, ExecutionMode::Sequential)
        .run_points(&points(), &spec, |_| {})
        .unwrap();
    let first = store.snapshot();
    let writes = fx.sink.writes();

    let report = orchestrator(&fx, &store, ExecutionMode::Parallel)
        .run_points(&points(), &spec, |_| {})
        .unwrap();

    assert_eq!(report.progress.skipped, 3);
    assert_eq!(fx.sink.writes(), writes);
    let second = store.snapshot();
    assert_eq!(second.len(), first.len());
    assert_eq!(second.iter().collect::<Vec<_>>(), first.iter().collect::<Vec<_>>());
}

#[test]
fn test_existing_outputs_are_skipped_without_pipeline() {
    let fx = fixture();
    fx.sink.mark_existing("a");
    let store = MemoryBatchLogStore::new();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);

    let report = orchestrator(&fx, &store, ExecutionMode::Sequential)
        .run(&[request("a", 0.8, 0.8, &spec)], |_| {})
        .unwrap();

    assert_eq!(report.progress.skipped, 1);
    assert_eq!(fx.raster.opens(), 0);
    let row = store.snapshot().get("a").cloned().unwrap();
    assert!(row.skipped && row.raster_ok && row.vector_ok);
}

struct PanickingRaster;

impl RasterSource for PanickingRaster {
    fn open(&self, locator: &str, _level: OverviewLevel) -> Result<Box<dyn RasterHandle>> {
        panic!("decoder crashed on {}", locator);
    }
}

#[test]
fn test_worker_panic_is_recorded_as_failure() {
    let fx = fixture();
    let pipeline = TilePipeline::new(
        TileSources {
            resolver: fx.resolver.clone(),
            raster: Arc::new(PanickingRaster),
            vector: Arc::new(fx.vector.clone()),
            sink: Arc::new(fx.sink.clone()),
        },
        "NS",
    );
    let store = MemoryBatchLogStore::new();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);

    let report = BatchOrchestrator::new(
        pipeline,
        Arc::new(store.clone()),
        BatchOptions { mode: ExecutionMode::Parallel, workers: Some(2), flush_every: 10 },
    )
    .unwrap()
    .run_points(&points(), &spec, |_| {})
    .unwrap();

    assert_eq!(report.progress.processed, 5);
    assert_eq!(report.progress.failed, 5);
    let row = store.snapshot().get("a").cloned().unwrap();
    assert!(row.error.unwrap().contains("panic: decoder crashed on rgb_a"));
    assert!(!fx.sink.outputs_exist("a"));
    assert_eq!(store.load().unwrap().len(), 5);
}

struct FailingLogStore;

impl BatchLogStore for FailingLogStore {
    fn load(&self) -> Result<BatchLog> {
        Ok(BatchLog::default())
    }

    fn flush(&self, _log: &BatchLog) -> Result<()> {
        Err(OrthochipError::Serialization("disk full".to_string()))
    }
}

#[test]
fn test_parallel_batch_stops_starting_tiles_after_log_failure() {
    let fx = fixture();
    let spec = spec([3, 64, 64], NodataPolicy::Flag);
    let requests: Vec<TileRequest> = (0..40)
        .map(|i| request(&format!("t{}", i), 0.2 + i as f64 * 0.03, 0.8, &spec))
        .collect();

    let err = BatchOrchestrator::new(
        fx.pipeline(),
        Arc::new(FailingLogStore),
        BatchOptions { mode: ExecutionMode::Parallel, workers: Some(1), flush_every: 1 },
    )
    .unwrap()
    .run(&requests, |_| {})
    .unwrap_err();

    assert!(err.to_string().contains("disk full"));
    let written = requests.iter().filter(|r| fx.sink.outputs_exist(r.id())).count();
    assert!(written >= 1);
    assert!(written < requests.len());
}
