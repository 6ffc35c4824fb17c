//! GeoTIFF encoding of chips and georeference decoding of sources
//!
//! Chips are written as DEFLATE-compressed, chunky 8-bit strips with GeoTIFF
//! georeferencing tags and the GDAL nodata tag. No GDAL dependency.

use ndarray::{Array3, ArrayView3, Axis};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{Affine, Crs, ImageChip, MaskChip};
use std::fs::File;
use flate2::write::ZlibEncoder;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tiff::TiffResult;

// GeoTIFF Tag IDs (not in standard tiff crate)
pub(crate) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(crate) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(crate) const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
pub(crate) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
pub(crate) const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// Adobe DEFLATE (zlib stream)
const COMPRESSION_DEFLATE: u16 = 8;

fn encode_error(err: tiff::TiffError) -> OrthochipError {
    OrthochipError::Serialization(format!("GeoTIFF encoding failed: {}", err))
}

fn deflate(pixels: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(pixels)?;
    Ok(encoder.finish()?)
}

fn is_geographic(crs: &Crs) -> bool {
    (4000..5000).contains(&crs.epsg)
}

/// Writer for 8-bit multi-band GeoTIFF chips
pub struct GeoTiffWriter<'a> {
    data: ArrayView3<'a, u8>,
    transform: Affine,
    crs: Crs,
    nodata: Option<u8>,
}

impl<'a> GeoTiffWriter<'a> {
    /// Band data laid out as (bands, rows, cols)
    pub fn new(data: ArrayView3<'a, u8>, transform: Affine, crs: Crs) -> Self {
        Self { data, transform, crs, nodata: None }
    }

    pub fn from_image(chip: &'a ImageChip) -> Self {
        Self::new(chip.data.view(), chip.transform, chip.crs.clone()).nodata(Some(chip.nodata))
    }

    pub fn from_mask(mask: &'a MaskChip) -> Self {
        Self::new(mask.data.view().insert_axis(Axis(0)), mask.transform, mask.crs.clone())
    }

    #[must_use]
    pub fn nodata(mut self, nodata: Option<u8>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Write to a file path
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Encode into an in-memory buffer
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write to any writer that implements Write + Seek
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let (bands, height, width) = self.data.dim();
        if bands == 0 || height == 0 || width == 0 {
            return Err(OrthochipError::validation(
                "chip",
                format!("cannot encode an empty raster ({}, {}, {})", bands, height, width),
            ));
        }

        let mut encoder = TiffEncoder::new(writer).map_err(encode_error)?;
        let mut dir = encoder.new_directory().map_err(encode_error)?;

        dir.write_tag(Tag::ImageWidth, width as u32).map_err(encode_error)?;
        dir.write_tag(Tag::ImageLength, height as u32).map_err(encode_error)?;
        dir.write_tag(Tag::BitsPerSample, vec![8u16; bands].as_slice()).map_err(encode_error)?;
        dir.write_tag(Tag::Compression, COMPRESSION_DEFLATE).map_err(encode_error)?;

        // PhotometricInterpretation: 2 = RGB for three or more bands, 1 = BlackIsZero otherwise
        let (photometric, color_bands) = if bands >= 3 { (2u16, 3) } else { (1u16, 1) };
        dir.write_tag(Tag::PhotometricInterpretation, photometric).map_err(encode_error)?;
        dir.write_tag(Tag::SamplesPerPixel, bands as u16).map_err(encode_error)?;
        dir.write_tag(Tag::SampleFormat, vec![1u16; bands].as_slice()).map_err(encode_error)?;
        dir.write_tag(Tag::PlanarConfiguration, 1u16).map_err(encode_error)?;
        dir.write_tag(Tag::RowsPerStrip, height as u32).map_err(encode_error)?;

        // ExtraSamples: bands beyond the color model are unspecified (0)
        if bands > color_bands {
            let extra_samples = vec![0u16; bands - color_bands];
            dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice()).map_err(encode_error)?;
        }

        self.write_geotiff_tags(&mut dir)?;

        // Interleave (bands, rows, cols) into chunky pixel order
        let pixels: Vec<u8> = self.data.permuted_axes([1, 2, 0]).iter().copied().collect();
        let strip = deflate(&pixels)?;
        let strip_offset = dir.write_data(strip.as_slice()).map_err(encode_error)?;
        let strip_offset = u32::try_from(strip_offset).map_err(|_| {
            OrthochipError::Serialization("strip offset exceeds classic TIFF range".to_string())
        })?;
        dir.write_tag(Tag::StripOffsets, strip_offset).map_err(encode_error)?;
        let strip_bytes = u32::try_from(strip.len()).map_err(|_| {
            OrthochipError::Serialization("strip byte count exceeds classic TIFF range".to_string())
        })?;
        dir.write_tag(Tag::StripByteCounts, strip_bytes).map_err(encode_error)?;

        dir.finish().map_err(encode_error)?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
        &self,
        dir: &mut DirectoryEncoder<W, K>,
    ) -> Result<()> {
        let t = &self.transform;

        if t.is_rectilinear() {
            // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
            let pixel_scale = [t.a, -t.e, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())
                .map_err(encode_error)?;

            // ModelTiepoint: pixel (0, 0) to the transform origin
            let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())
                .map_err(encode_error)?;
        } else {
            let matrix = [
                t.a, t.b, 0.0, t.c, //
                t.d, t.e, 0.0, t.f, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION), matrix.as_slice())
                .map_err(encode_error)?;
        }

        let geokeys = self.build_geokey_directory();
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())
            .map_err(encode_error)?;

        if let Some(nodata) = self.nodata {
            dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.to_string().as_str())
                .map_err(encode_error)?;
        }

        Ok(())
    }

    fn build_geokey_directory(&self) -> Vec<u16> {
        // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys, then 4 shorts per key]
        let geographic = is_geographic(&self.crs);
        let epsg = u16::try_from(self.crs.epsg).unwrap_or(32767);

        let mut keys = vec![1, 1, 0, 3];
        keys.extend_from_slice(&[
            GT_MODEL_TYPE_GEO_KEY,
            0,
            1,
            if geographic { MODEL_TYPE_GEOGRAPHIC } else { MODEL_TYPE_PROJECTED },
        ]);
        keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
        if geographic {
            keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, epsg]);
        } else {
            keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, epsg]);
        }
        keys
    }
}

/// Affine transform and CRS stored in the current image directory
pub(crate) fn read_georeference<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> TiffResult<(Option<Affine>, Option<Crs>)> {
    let transform = match decoder.find_tag(Tag::from_u16_exhaustive(GEOTIFF_MODELTRANSFORMATION))? {
        Some(value) => {
            let m = value.into_f64_vec()?;
            (m.len() >= 8).then(|| Affine::new(m[0], m[1], m[3], m[4], m[5], m[7]))
        }
        None => {
            let scale = decoder.find_tag(Tag::from_u16_exhaustive(GEOTIFF_MODELPIXELSCALE))?;
            let tie = decoder.find_tag(Tag::from_u16_exhaustive(GEOTIFF_MODELTIEPOINT))?;
            match (scale, tie) {
                (Some(scale), Some(tie)) => {
                    let s = scale.into_f64_vec()?;
                    let t = tie.into_f64_vec()?;
                    (s.len() >= 2 && t.len() >= 6).then(|| {
                        Affine::new(s[0], 0.0, t[3] - t[0] * s[0], 0.0, -s[1], t[4] + t[1] * s[1])
                    })
                }
                _ => None,
            }
        }
    };

    let crs = match decoder.find_tag(Tag::from_u16_exhaustive(GEOTIFF_GEOKEYDIRECTORY))? {
        Some(value) => crs_from_geokeys(&value.into_u16_vec()?),
        None => None,
    };

    Ok((transform, crs))
}

fn crs_from_geokeys(keys: &[u16]) -> Option<Crs> {
    let entries = keys.get(4..)?;
    entries
        .chunks_exact(4)
        .find(|k| {
            (k[0] == PROJECTED_CS_TYPE_GEO_KEY || k[0] == GEOGRAPHIC_TYPE_GEO_KEY) && k[1] == 0
        })
        .map(|k| Crs::from_epsg(k[3] as u32))
}

/// Samples per pixel of the current image directory
pub(crate) fn samples_per_pixel<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<usize> {
    Ok(match decoder.find_tag(Tag::SamplesPerPixel)? {
        Some(value) => value.into_u16()? as usize,
        None => 1,
    })
}

/// Read a whole 8-bit GeoTIFF as (bands, rows, cols) with its georeference
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<(Array3<u8>, Affine, Option<Crs>)> {
    let locator = path.as_ref().display().to_string();
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| OrthochipError::source_io(&locator, e))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions().map_err(|e| OrthochipError::source_io(&locator, e))?;
    let samples = samples_per_pixel(&mut decoder).map_err(|e| OrthochipError::source_io(&locator, e))?;
    let (transform, crs) =
        read_georeference(&mut decoder).map_err(|e| OrthochipError::source_io(&locator, e))?;

    let pixels = match decoder.read_image().map_err(|e| OrthochipError::source_io(&locator, e))? {
        DecodingResult::U8(v) => v,
        _ => return Err(OrthochipError::source_io(&locator, "expected 8-bit samples")),
    };

    let data = Array3::from_shape_vec((height as usize, width as usize, samples), pixels)
        .map_err(|e| OrthochipError::source_io(&locator, e))?
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned();

    let transform = transform.unwrap_or_else(|| Affine::north_up(0.0, 0.0, 1.0, 1.0));
    Ok((data, transform, crs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn chip(bands: usize) -> ImageChip {
        let data = Array3::from_shape_fn((bands, 4, 6), |(b, r, c)| (b * 50 + r * 6 + c) as u8);
        ImageChip {
            data,
            transform: Affine::north_up(400_000.0, 300_000.0, 1.6, 1.6),
            crs: Crs::austria_lambert(),
            nodata: 0,
            nodata_present: false,
        }
    }

    #[test]
    fn test_write_and_read_rgbn() {
        let chip = chip(4);
        let bytes = GeoTiffWriter::from_image(&chip).to_bytes().unwrap();
        assert!(bytes[0] == b'I' && bytes[1] == b'I' || bytes[0] == b'M' && bytes[1] == b'M');

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input_t.tif");
        std::fs::write(&path, bytes).unwrap();

        let (data, transform, crs) = read_geotiff(&path).unwrap();
        assert_eq!(data, chip.data);
        assert_eq!(transform, chip.transform);
        assert_eq!(crs.unwrap().epsg, 31287);
    }

    #[test]
    fn test_write_mask() {
        let mask = MaskChip {
            data: Array2::from_shape_fn((3, 5), |(r, c)| ((r + c) % 2) as u8),
            transform: Affine::north_up(0.0, 10.0, 2.0, 2.0),
            crs: Crs::austria_lambert(),
            class_pixels: BTreeMap::new(),
            feature_count: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target_t.tif");
        GeoTiffWriter::from_mask(&mask).write(&path).unwrap();

        let (data, transform, _) = read_geotiff(&path).unwrap();
        assert_eq!(data.dim(), (1, 3, 5));
        assert_eq!(data.index_axis(Axis(0), 0), mask.data);
        assert_eq!(transform, mask.transform);
    }

    #[test]
    fn test_chip_strips_are_deflated() {
        let data = Array3::<u8>::from_elem((4, 64, 64), 7);
        let bytes = GeoTiffWriter::new(
            data.view(),
            Affine::north_up(0.0, 64.0, 1.0, 1.0),
            Crs::austria_lambert(),
        )
        .to_bytes()
        .unwrap();
        assert!(bytes.len() < data.len() / 4);

        let mut decoder = Decoder::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.get_tag_u32(Tag::Compression).unwrap(), u32::from(COMPRESSION_DEFLATE));
        match decoder.read_image().unwrap() {
            DecodingResult::U8(pixels) => assert!(pixels.iter().all(|&v| v == 7)),
            _ => panic!("expected 8-bit samples"),
        }
    }

    #[test]
    fn test_rejects_empty_raster() {
        let data = Array3::<u8>::zeros((3, 0, 4));
        let writer =
            GeoTiffWriter::new(data.view(), Affine::north_up(0.0, 0.0, 1.0, 1.0), Crs::wgs84());
        assert!(writer.to_bytes().is_err());
    }

    #[test]
    fn test_crs_from_geokeys() {
        let keys = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 31287];
        assert_eq!(crs_from_geokeys(&keys).unwrap().epsg, 31287);
        assert!(crs_from_geokeys(&[1, 1, 0, 0]).is_none());
    }
}
