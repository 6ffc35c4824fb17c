//! Per-tile pipeline and outcome tracking

use crate::extract::RasterExtractor;
use crate::vectorize::VectorRasterizer;
use orthochip_core::error::Result;
use orthochip_core::models::{TileRequest, TileState};
use orthochip_core::ports::{RasterSource, TileSink, VectorSource};
use orthochip_geo::CoordinateResolver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Adapters shared read-only by every tile of a batch
#[derive(Clone)]
pub struct TileSources {
    pub resolver: CoordinateResolver,
    pub raster: Arc<dyn RasterSource>,
    pub vector: Arc<dyn VectorSource>,
    pub sink: Arc<dyn TileSink>,
}

/// Runs one tile from query point to written outputs
#[derive(Clone)]
pub struct TilePipeline {
    sources: TileSources,
    class_attribute: String,
}

impl TilePipeline {
    pub fn new(sources: TileSources, class_attribute: impl Into<String>) -> Self {
        Self { sources, class_attribute: class_attribute.into() }
    }

    pub fn sink(&self) -> &dyn TileSink {
        self.sources.sink.as_ref()
    }

    /// Process a tile; every failure is absorbed into the returned state
    pub fn process(&self, request: &TileRequest) -> TileState {
        let span = tracing::info_span!("tile", id = %request.id());
        let _guard = span.enter();

        let mut state = TileState::new(request.id());
        match self.run(request, &mut state) {
            Ok(()) => tracing::info!(phase = %state.phase(), "Tile finished"),
            Err(err) if err.is_out_of_coverage() => {
                tracing::warn!(error = %err, "Query point outside catalog coverage");
                state.fail(&err);
            }
            Err(err) => {
                tracing::warn!(error = %err, phase = %state.phase(), "Tile failed");
                state.fail(&err);
            }
        }
        state
    }

    /// [`TilePipeline::process`] with panics contained and recorded as failures
    pub fn process_guarded(&self, request: &TileRequest) -> TileState {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(request))) {
            Ok(state) => state,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(id = %request.id(), panic = %message, "Tile panicked");

                let mut state = TileState::new(request.id());
                state.fail_with(format!("panic: {}", message));
                state
            }
        }
    }

    fn run(&self, request: &TileRequest, state: &mut TileState) -> Result<()> {
        let spec = request.spec();
        let id = request.id();

        let (projected, entry) = self.sources.resolver.resolve(request.point())?;

        let extraction = RasterExtractor::new(
            self.sources.raster.as_ref(),
            self.sources.resolver.transformer(),
        )
        .extract(entry, projected, self.sources.resolver.catalog_crs(), spec)?;
        let Some(chip) = extraction.chip else {
            state.record_error("window exceeds source coverage, tile removed");
            state.set_raster(false)?;
            return Ok(());
        };

        if chip.nodata_present {
            state.mark_nodata();
        }
        self.sources.sink.write_image(id, &chip)?;
        state.set_raster(true)?;
        tracing::debug!(shape = ?chip.data.dim(), nodata_present = chip.nodata_present, "Raster step done");

        let rasterizer = VectorRasterizer::new(
            self.sources.vector.as_ref(),
            self.sources.resolver.transformer(),
            &self.class_attribute,
        );
        let vector = rasterizer.rasterize(entry, &extraction.window, &chip.crs, spec)?;

        self.sources.sink.write_mask(id, &vector.mask)?;
        if let Some(extract) = &vector.extract {
            self.sources.sink.write_vector_extract(id, extract)?;
        }

        state.record_mask(
            vector.mask.class_pixels.clone(),
            vector.mask.pixel_count(),
            vector.mask.feature_count,
        );
        state.set_vector(true)?;
        tracing::debug!(
            features = vector.mask.feature_count,
            foreground = vector.mask.foreground_pixels(),
            "Vector step done"
        );
        Ok(())
    }
}
