use crate::types::{BackscatterImage, ChangeError, ChangeResult};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Basic facts about a downloaded change raster
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSummary {
    pub band_count: usize,
    pub width: usize,
    pub height: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub valid_pixels: usize,
}

/// Reader for exported GeoTIFF rasters
pub struct RasterReader;

impl RasterReader {
    /// Read the first band, with the no-data value mapped to NaN
    pub fn read_first_band<P: AsRef<Path>>(path: P) -> ChangeResult<BackscatterImage> {
        log::info!("Reading raster from: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let samples = band_data
            .data
            .into_iter()
            .map(|v| match no_data {
                Some(nd) if (v as f64 - nd).abs() < f64::EPSILON => f32::NAN,
                _ => v,
            })
            .collect();

        Array2::from_shape_vec((height, width), samples)
            .map_err(|e| ChangeError::Processing(format!("Failed to reshape raster data: {}", e)))
    }

    /// Band count, size and first-band statistics
    pub fn inspect<P: AsRef<Path>>(path: P) -> ChangeResult<RasterSummary> {
        let band_count = Dataset::open(path.as_ref())?.raster_count() as usize;
        let band = Self::read_first_band(&path)?;
        let (height, width) = band.dim();

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid_pixels = 0usize;
        for &v in band.iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            valid_pixels += 1;
        }

        let mean = if valid_pixels > 0 { (sum / valid_pixels as f64) as f32 } else { f32::NAN };
        if valid_pixels == 0 {
            min = f32::NAN;
            max = f32::NAN;
        }

        let summary = RasterSummary {
            band_count,
            width,
            height,
            min,
            max,
            mean,
            valid_pixels,
        };
        log::info!("Number of bands: {}", summary.band_count);
        log::info!("Image width: {}", summary.width);
        log::info!("Image height: {}", summary.height);
        log::info!(
            "Backscatter change range: {} .. {} (mean {})",
            summary.min,
            summary.max,
            summary.mean
        );

        Ok(summary)
    }
}
