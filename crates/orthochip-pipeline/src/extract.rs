//! Raster Extractor: reads band groups for a planned window, pads partial
//! coverage with nodata and area-averages resampled windows.

use geo::Coord;
use ndarray::{concatenate, s, Array2, Array3, ArrayView3, Axis, Zip};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{
    CatalogEntry, ChipSpec, Crs, ImageChip, NodataPolicy, PixelWindow, RasterGrid,
};
use orthochip_core::ports::{PointTransformer, RasterSource, WindowRead};
use orthochip_geo::{plan_window, ExtractionWindow};

/// Allowed transform difference between band groups, in source pixels
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// Result of the raster step for one tile
#[derive(Debug, Clone, PartialEq)]
pub struct RasterExtraction {
    /// Window shared with the vector step
    pub window: ExtractionWindow,
    /// `None` when the tile was discarded under the `remove` nodata policy
    pub chip: Option<ImageChip>,
}

/// Reads and assembles imagery chips
pub struct RasterExtractor<'a> {
    source: &'a dyn RasterSource,
    transformer: &'a dyn PointTransformer,
}

impl<'a> RasterExtractor<'a> {
    pub fn new(source: &'a dyn RasterSource, transformer: &'a dyn PointTransformer) -> Self {
        Self { source, transformer }
    }

    /// Extract the chip centred on `point` (given in `point_crs`) from `entry`'s imagery
    ///
    /// The point is moved into the imagery CRS before the window is planned.
    pub fn extract(
        &self,
        entry: &CatalogEntry,
        point: Coord<f64>,
        point_crs: &Crs,
        spec: &ChipSpec,
    ) -> Result<RasterExtraction> {
        let level = spec.pixel_size().level();
        let nodata = spec.nodata_value();

        let mut planned: Option<(ExtractionWindow, RasterGrid)> = None;
        let mut blocks: Vec<Array3<u8>> = Vec::new();
        let mut valid: Option<Array2<bool>> = None;
        let mut partial = false;

        for &group in spec.shape().layout.band_groups() {
            let locator = entry.raster_locator(group).ok_or_else(|| {
                OrthochipError::source_io(
                    &entry.sheet_id,
                    format!("sheet has no {} imagery source", group),
                )
            })?;

            let mut handle = self.source.open(locator, level)?;
            let grid = handle.grid().clone();
            if grid.bands < group.band_count() {
                return Err(OrthochipError::source_io(
                    locator,
                    format!("expected {} bands, found {}", group.band_count(), grid.bands),
                ));
            }

            let window = match &planned {
                Some((window, reference)) => {
                    ensure_aligned(reference, &grid, locator)?;
                    *window
                }
                None => {
                    let local = self.transformer.transform(point_crs, &grid.crs, point)?;
                    let window = plan_window(local, spec, &grid)?;
                    planned = Some((window, grid.clone()));
                    window
                }
            };

            let read = handle.read_window(&window.source)?;
            let complete = read.is_complete(&window.source);
            tracing::debug!(locator, band_group = %group, complete, "Read imagery window");

            let (block, coverage) = place_block(read, &window.source, group.band_count(), nodata)
                .map_err(|reason| OrthochipError::source_io(locator, reason))?;

            if !complete {
                partial = true;
                if spec.nodata_policy() == NodataPolicy::Remove {
                    tracing::warn!(
                        sheet = %entry.sheet_id,
                        band_group = %group,
                        col_off = window.source.col_off,
                        row_off = window.source.row_off,
                        "Window exceeds source coverage, tile removed"
                    );
                    return Ok(RasterExtraction { window, chip: None });
                }
            }

            valid = Some(match valid {
                Some(mut valid) => {
                    Zip::from(&mut valid).and(&coverage).for_each(|v, &c| *v = *v && c);
                    valid
                }
                None => coverage,
            });
            blocks.push(block);
        }

        let (window, reference) = planned
            .ok_or_else(|| OrthochipError::validation("shape", "no band groups to read"))?;

        let views: Vec<ArrayView3<u8>> = blocks.iter().map(|block| block.view()).collect();
        let data = concatenate(Axis(0), &views)
            .map_err(|e| OrthochipError::validation("shape", e.to_string()))?;

        let data = match (&valid, window.is_resampled()) {
            (Some(valid), true) => {
                area_average(&data, valid, window.out_height, window.out_width, nodata)
            }
            _ => data,
        };

        if partial {
            tracing::warn!(
                sheet = %entry.sheet_id,
                col_off = window.source.col_off,
                row_off = window.source.row_off,
                width = window.source.width,
                height = window.source.height,
                grid_width = reference.width,
                grid_height = reference.height,
                "Window exceeds source coverage, padded with nodata"
            );
        }

        Ok(RasterExtraction {
            window,
            chip: Some(ImageChip {
                data,
                transform: window.transform,
                crs: reference.crs,
                nodata,
                nodata_present: partial,
            }),
        })
    }
}

/// Band groups must share transform and CRS to be stacked
///
/// Extents may differ; every read is clipped to its own source.
fn ensure_aligned(reference: &RasterGrid, grid: &RasterGrid, locator: &str) -> Result<()> {
    let (px, _) = reference.transform.pixel_size();
    let tolerance = ALIGNMENT_TOLERANCE * px.max(f64::EPSILON);
    let a = reference.transform.to_gdal();
    let b = grid.transform.to_gdal();
    let same_transform = a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance);

    if !same_transform || !reference.crs.matches(&grid.crs) {
        return Err(OrthochipError::source_io(
            locator,
            "band group grid does not align with the rgb source",
        ));
    }
    Ok(())
}

/// Place the read block at its true offset inside the requested window
///
/// Returns the padded block and a mask of pixels backed by source data.
fn place_block(
    read: WindowRead,
    requested: &PixelWindow,
    bands: usize,
    nodata: u8,
) -> std::result::Result<(Array3<u8>, Array2<bool>), String> {
    let mut block = Array3::from_elem((bands, requested.height, requested.width), nodata);
    let mut coverage = Array2::from_elem((requested.height, requested.width), false);

    if let Some(clipped) = read.clipped {
        let (read_bands, read_height, read_width) = read.data.dim();
        if read_bands < bands || read_height != clipped.height || read_width != clipped.width {
            return Err(format!(
                "window read returned {:?}, expected at least ({}, {}, {})",
                read.data.dim(),
                bands,
                clipped.height,
                clipped.width
            ));
        }

        let (col, row) = requested.offset_of(&clipped);
        let rows = row..row + clipped.height;
        let cols = col..col + clipped.width;
        block
            .slice_mut(s![.., rows.clone(), cols.clone()])
            .assign(&read.data.slice(s![..bands, .., ..]));
        coverage.slice_mut(s![rows, cols]).fill(true);
    }

    Ok((block, coverage))
}

/// Source pixels overlapping each destination pixel with their overlap length
fn area_weights(src: usize, dst: usize) -> Vec<Vec<(usize, f64)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|i| {
            let start = i as f64 * scale;
            let end = start + scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src);
            (first..last)
                .filter_map(|j| {
                    let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                    (overlap > 1e-12).then_some((j, overlap))
                })
                .collect()
        })
        .collect()
}

/// Area-weighted average of `data` onto an `out_height` x `out_width` grid
///
/// Pixels outside source coverage do not contribute; output pixels with no
/// covered contributors take the nodata value.
fn area_average(
    data: &Array3<u8>,
    valid: &Array2<bool>,
    out_height: usize,
    out_width: usize,
    nodata: u8,
) -> Array3<u8> {
    let (bands, src_height, src_width) = data.dim();
    let row_weights = area_weights(src_height, out_height);
    let col_weights = area_weights(src_width, out_width);

    let mut out = Array3::from_elem((bands, out_height, out_width), nodata);
    let mut sums = vec![0.0f64; bands];

    for (i, rows) in row_weights.iter().enumerate() {
        for (j, cols) in col_weights.iter().enumerate() {
            sums.iter_mut().for_each(|s| *s = 0.0);
            let mut total = 0.0;

            for &(r, wr) in rows {
                for &(c, wc) in cols {
                    if !valid[[r, c]] {
                        continue;
                    }
                    let w = wr * wc;
                    total += w;
                    for (b, sum) in sums.iter_mut().enumerate() {
                        *sum += w * data[[b, r, c]] as f64;
                    }
                }
            }

            if total > 0.0 {
                for (b, sum) in sums.iter().enumerate() {
                    out[[b, i, j]] = (sum / total).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use orthochip_core::models::{Affine, Crs};

    #[test]
    fn test_area_weights_cover_source() {
        let weights = area_weights(7, 5);
        assert_eq!(weights.len(), 5);
        for w in &weights {
            let total: f64 = w.iter().map(|(_, o)| o).sum();
            assert!((total - 1.4).abs() < 1e-9);
        }
        assert_eq!(weights[0][0], (0, 1.0));
        assert_eq!(weights[4].last().map(|(j, _)| *j), Some(6));
    }

    #[test]
    fn test_area_average_block_mean() {
        let data = Array3::from_shape_fn((1, 4, 4), |(_, r, c)| if (r + c) % 2 == 0 { 0 } else { 100 });
        let valid = Array2::from_elem((4, 4), true);
        let out = area_average(&data, &valid, 2, 2, 255);
        assert!(out.iter().all(|&v| v == 50));
    }

    #[test]
    fn test_area_average_ignores_uncovered_pixels() {
        let data = Array3::from_elem((2, 4, 4), 80u8);
        let mut valid = Array2::from_elem((4, 4), true);
        valid.slice_mut(s![.., 2..]).fill(false);
        let out = area_average(&data, &valid, 2, 2, 7);
        assert_eq!(out[[0, 0, 0]], 80);
        assert_eq!(out[[1, 1, 0]], 80);
        assert_eq!(out[[0, 0, 1]], 7);
    }

    #[test]
    fn test_place_block_uses_true_offset() {
        let requested = PixelWindow::new(-2, -1, 4, 3);
        let read = WindowRead {
            data: Array3::from_elem((4, 2, 2), 9),
            clipped: Some(PixelWindow::new(0, 0, 2, 2)),
        };
        let (block, coverage) = place_block(read, &requested, 3, 0).unwrap();
        assert_eq!(block.dim(), (3, 3, 4));
        assert_eq!(block[[0, 0, 0]], 0);
        assert_eq!(block[[2, 1, 2]], 9);
        assert_eq!(block[[0, 2, 3]], 9);
        assert_eq!(coverage.iter().filter(|&&c| c).count(), 4);
    }

    #[test]
    fn test_place_block_rejects_short_reads() {
        let requested = PixelWindow::new(0, 0, 4, 4);
        let read = WindowRead {
            data: Array3::zeros((1, 4, 4)),
            clipped: Some(requested),
        };
        assert!(place_block(read, &requested, 3, 0).is_err());
    }

    #[test]
    fn test_alignment_check() {
        let grid = RasterGrid {
            width: 10,
            height: 10,
            bands: 3,
            transform: Affine::north_up(0.0, 10.0, 1.0, 1.0),
            crs: Crs::austria_lambert(),
        };
        assert!(ensure_aligned(&grid, &grid.clone(), "nir").is_ok());
        let shifted = RasterGrid { transform: Affine::north_up(0.5, 10.0, 1.0, 1.0), ..grid.clone() };
        assert!(ensure_aligned(&grid, &shifted, "nir").is_err());
        let reprojected = RasterGrid { crs: Crs::from_epsg(3416), ..grid.clone() };
        assert!(ensure_aligned(&grid, &reprojected, "nir").is_err());
    }

    #[test]
    fn test_alignment_allows_different_extent_on_same_grid() {
        let grid = RasterGrid {
            width: 10,
            height: 10,
            bands: 3,
            transform: Affine::north_up(0.0, 10.0, 1.0, 1.0),
            crs: Crs::austria_lambert(),
        };
        let smaller = RasterGrid { width: 6, height: 4, bands: 1, ..grid.clone() };
        assert!(ensure_aligned(&grid, &smaller, "nir").is_ok());
    }
}
