use crate::core::aggregate::RepresentativeImage;
use crate::types::{BackscatterImage, BandImage, ChangeError, ChangeResult};
use ndarray::{Array2, Zip};

/// Backscatter difference above which a pixel counts as significant change
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Name of the differenced band
pub const CHANGE_BAND: &str = "Change";

/// IGBP "water bodies" class in MODIS land-cover type 1
pub const IGBP_WATER_CLASS: u8 = 17;

/// Comparison minus baseline, one band named "Change"
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRaster {
    pub band: BandImage,
}

impl ChangeRaster {
    pub fn data(&self) -> &BackscatterImage {
        &self.band.data
    }

    pub fn valid_pixels(&self) -> usize {
        self.band.data.iter().filter(|v| v.is_finite()).count()
    }

    /// True when every valid pixel is exactly zero
    pub fn is_null_change(&self) -> bool {
        self.band.data.iter().filter(|v| v.is_finite()).all(|&v| v == 0.0)
    }
}

/// Pixels whose change exceeds the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SignificantChangeMask {
    pub mask: Array2<bool>,
    pub threshold: f32,
}

impl SignificantChangeMask {
    pub fn significant_pixels(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Static land-cover grid used to drop water pixels after thresholding
#[derive(Debug, Clone)]
pub struct LandCoverMask {
    pub classes: Array2<u8>,
    pub water_class: u8,
}

impl LandCoverMask {
    pub fn new(classes: Array2<u8>) -> Self {
        Self {
            classes,
            water_class: IGBP_WATER_CLASS,
        }
    }

    /// Blank water pixels: NaN in the change raster, false in the mask
    pub fn apply(
        &self,
        change: &mut ChangeRaster,
        mask: &mut SignificantChangeMask,
    ) -> ChangeResult<()> {
        ensure_same_shape(change.band.data.dim(), self.classes.dim())?;

        let water = self.water_class;
        Zip::from(&mut change.band.data)
            .and(&mut mask.mask)
            .and(&self.classes)
            .for_each(|value, significant, &class| {
                if class == water {
                    *value = f32::NAN;
                    *significant = false;
                }
            });

        log::debug!(
            "Land-cover mask applied: {} significant pixels remain",
            mask.significant_pixels()
        );
        Ok(())
    }
}

/// Backscatter-based water classifier: pixels darker than `threshold_db` are water
#[derive(Debug, Clone, Copy)]
pub struct WaterFilter {
    pub threshold_db: f32,
}

impl Default for WaterFilter {
    fn default() -> Self {
        Self { threshold_db: -16.0 }
    }
}

impl WaterFilter {
    /// Copy of `image` with water pixels set to NaN in every band
    pub fn apply(&self, image: &RepresentativeImage) -> RepresentativeImage {
        let Some(primary) = image.primary_band() else {
            return image.clone();
        };
        let water = primary.data.mapv(|v| v < self.threshold_db);

        let bands = image
            .bands
            .iter()
            .map(|band| {
                let mut data = band.data.clone();
                if data.dim() == water.dim() {
                    Zip::from(&mut data).and(&water).for_each(|v, &is_water| {
                        if is_water {
                            *v = f32::NAN;
                        }
                    });
                }
                BandImage::new(band.name.clone(), data)
            })
            .collect();

        RepresentativeImage {
            bands,
            scene_count: image.scene_count,
        }
    }
}

fn ensure_same_shape(expected: (usize, usize), found: (usize, usize)) -> ChangeResult<()> {
    if expected != found {
        return Err(ChangeError::ShapeMismatch { expected, found });
    }
    Ok(())
}

/// Differences two representative images and thresholds the result
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    threshold: f32,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ChangeDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Comparison minus baseline over the primary band, plus its significance mask
    pub fn compute_change(
        &self,
        baseline: &RepresentativeImage,
        comparison: &RepresentativeImage,
    ) -> ChangeResult<(ChangeRaster, SignificantChangeMask)> {
        let before = primary(baseline, "baseline")?;
        let after = primary(comparison, "comparison")?;
        ensure_same_shape(before.data.dim(), after.data.dim())?;

        let difference = &after.data - &before.data;
        let change = ChangeRaster {
            band: BandImage::new(CHANGE_BAND, difference),
        };
        let mask = self.threshold_mask(&change);

        log::info!(
            "Change computed: {} valid pixels, {} above threshold {}",
            change.valid_pixels(),
            mask.significant_pixels(),
            self.threshold
        );
        Ok((change, mask))
    }

    /// `change > threshold`; no-data pixels are never significant
    pub fn threshold_mask(&self, change: &ChangeRaster) -> SignificantChangeMask {
        let threshold = self.threshold;
        SignificantChangeMask {
            mask: change.band.data.mapv(|v| v > threshold),
            threshold,
        }
    }
}

fn primary<'a>(image: &'a RepresentativeImage, period: &str) -> ChangeResult<&'a BandImage> {
    image.primary_band().ok_or_else(|| ChangeError::NoBands {
        period: period.to_string(),
    })
}
