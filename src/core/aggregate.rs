use crate::io::archive::{SceneArchive, SceneFilter, SceneQuery};
use crate::types::{
    BackscatterImage, BandImage, BoundingBox, ChangeError, ChangeResult, DateRange, Scene,
};
use ndarray::Array2;

/// Per-pixel median of every scene matched for one period
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentativeImage {
    pub bands: Vec<BandImage>,
    pub scene_count: usize,
}

impl RepresentativeImage {
    pub fn primary_band(&self) -> Option<&BandImage> {
        self.bands.first()
    }
}

/// Result of reducing one period
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Image(RepresentativeImage),
    /// The archive matched no scenes
    Empty,
}

impl Aggregate {
    pub fn is_empty(&self) -> bool {
        matches!(self, Aggregate::Empty)
    }

    pub fn into_image(self) -> Option<RepresentativeImage> {
        match self {
            Aggregate::Image(image) => Some(image),
            Aggregate::Empty => None,
        }
    }
}

/// Queries the archive for a period and reduces the matches to a median image
pub struct TemporalAggregator<'a> {
    archive: &'a dyn SceneArchive,
    filter: SceneFilter,
}

impl<'a> TemporalAggregator<'a> {
    pub fn new(archive: &'a dyn SceneArchive, filter: SceneFilter) -> Self {
        Self { archive, filter }
    }

    pub fn filter(&self) -> &SceneFilter {
        &self.filter
    }

    fn query(&self, bbox: &BoundingBox, window: Option<&DateRange>) -> SceneQuery<'_> {
        SceneQuery {
            bbox: *bbox,
            window: window.copied(),
            filter: &self.filter,
        }
    }

    /// Median image for `window`, or `Empty` when nothing matches
    pub fn aggregate(
        &self,
        bbox: &BoundingBox,
        window: &DateRange,
        period: &str,
    ) -> ChangeResult<Aggregate> {
        let query = self.query(bbox, Some(window));
        let size = self.archive.count(&query)?;
        log::info!(
            "Number of images in collection from {} to {}: {}",
            window.start, window.end, size
        );

        if size == 0 {
            return Ok(Aggregate::Empty);
        }

        let scenes = self.archive.scenes(&query)?;
        let image = self.reduce(&scenes, period)?;
        Ok(Aggregate::Image(image))
    }

    /// Median over every archived scene intersecting `bbox`, ignoring dates
    pub fn aggregate_archive_wide(&self, bbox: &BoundingBox) -> ChangeResult<Aggregate> {
        log::info!("Attempting to use all available images for the selected region");
        let query = self.query(bbox, None);
        let size = self.archive.count(&query)?;
        log::info!("Number of all available images: {}", size);

        if size == 0 {
            log::warn!("No images available for the selected region");
            return Ok(Aggregate::Empty);
        }

        let scenes = self.archive.scenes(&query)?;
        Ok(Aggregate::Image(self.reduce(&scenes, "archive")?))
    }

    /// Every matched scene, each reduced to the filter band
    pub fn collect_scenes(
        &self,
        bbox: &BoundingBox,
        window: Option<&DateRange>,
    ) -> ChangeResult<Vec<Scene>> {
        let query = self.query(bbox, window);
        let scenes = self.archive.scenes(&query)?;
        log::info!("Number of images in collection {}: {}", query, scenes.len());

        let band_name = &self.filter.band;
        Ok(scenes
            .into_iter()
            .filter_map(|scene| {
                let band = scene.band(band_name).cloned();
                match band {
                    Some(band) => Some(Scene {
                        bands: vec![band],
                        ..scene
                    }),
                    None => {
                        log::warn!("Scene {} has no {} band, skipping", scene.id, band_name);
                        None
                    }
                }
            })
            .collect())
    }

    fn reduce(&self, scenes: &[Scene], period: &str) -> ChangeResult<RepresentativeImage> {
        let band_name = &self.filter.band;
        let stack: Vec<&BackscatterImage> = scenes
            .iter()
            .filter_map(|scene| {
                let band = scene.band(band_name);
                if band.is_none() {
                    log::debug!("Scene {} has no {} band", scene.id, band_name);
                }
                band.map(|b| &b.data)
            })
            .collect();

        if stack.is_empty() {
            log::warn!(
                "None of the {} scenes carry the {} band for the {} period",
                scenes.len(),
                band_name,
                period
            );
            return Ok(RepresentativeImage {
                bands: Vec::new(),
                scene_count: scenes.len(),
            });
        }

        log::debug!("Reducing {} scenes to their median for the {} period", stack.len(), period);
        let median = median_composite(&stack)?;

        Ok(RepresentativeImage {
            bands: vec![BandImage::new(band_name.clone(), median)],
            scene_count: stack.len(),
        })
    }
}

/// Fail when a reduced image exposes no bands
pub fn check_image_bands(
    image: RepresentativeImage,
    period: &str,
) -> ChangeResult<RepresentativeImage> {
    if image.bands.is_empty() {
        return Err(ChangeError::NoBands {
            period: period.to_string(),
        });
    }
    Ok(image)
}

/// Per-pixel median across a stack of equally-shaped rasters.
///
/// Non-finite samples are skipped; a pixel without any valid sample is NaN.
/// Even sample counts average the two middle values.
pub fn median_composite(stack: &[&BackscatterImage]) -> ChangeResult<BackscatterImage> {
    let first = stack
        .first()
        .ok_or_else(|| ChangeError::Processing("Cannot reduce an empty image stack".to_string()))?;
    let shape = first.dim();

    for image in stack.iter().skip(1) {
        if image.dim() != shape {
            return Err(ChangeError::ShapeMismatch {
                expected: shape,
                found: image.dim(),
            });
        }
    }

    let (height, width) = shape;
    let samples = median_rows(stack, height, width);

    Array2::from_shape_vec((height, width), samples)
        .map_err(|e| ChangeError::Processing(format!("Failed to assemble median image: {}", e)))
}

#[cfg(feature = "parallel")]
fn median_rows(stack: &[&BackscatterImage], height: usize, width: usize) -> Vec<f32> {
    use rayon::prelude::*;

    let rows: Vec<Vec<f32>> = (0..height)
        .into_par_iter()
        .map(|i| median_row(stack, i, width))
        .collect();
    rows.into_iter().flatten().collect()
}

#[cfg(not(feature = "parallel"))]
fn median_rows(stack: &[&BackscatterImage], height: usize, width: usize) -> Vec<f32> {
    (0..height).flat_map(|i| median_row(stack, i, width)).collect()
}

fn median_row(stack: &[&BackscatterImage], row: usize, width: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(stack.len());
    (0..width)
        .map(|j| {
            values.clear();
            values.extend(stack.iter().map(|image| image[[row, j]]).filter(|v| v.is_finite()));
            median_of(&mut values)
        })
        .collect()
}

fn median_of(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeResult, TimeWindow};
    use approx::assert_relative_eq;
    use ndarray::array;

    struct FixedArchive {
        scenes: Vec<Scene>,
    }

    impl SceneArchive for FixedArchive {
        fn count(&self, _query: &SceneQuery<'_>) -> ChangeResult<usize> {
            Ok(self.scenes.len())
        }

        fn scenes(&self, _query: &SceneQuery<'_>) -> ChangeResult<Vec<Scene>> {
            Ok(self.scenes.clone())
        }
    }

    fn scene(id: &str, band: &str, data: BackscatterImage) -> Scene {
        Scene {
            id: id.to_string(),
            acquired: None,
            bands: vec![BandImage::new(band, data)],
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox {
            min_lon: -10.0,
            max_lon: -9.0,
            min_lat: 40.0,
            max_lat: 41.0,
        }
    }

    fn window() -> DateRange {
        TimeWindow::new("2023-01-01", "2023-01-10").validate("baseline").unwrap()
    }

    #[test]
    fn test_median_composite_odd_and_even() {
        let a = array![[1.0f32, 10.0], [f32::NAN, 4.0]];
        let b = array![[3.0f32, 20.0], [f32::NAN, 2.0]];
        let c = array![[2.0f32, 30.0], [f32::NAN, f32::INFINITY]];

        let median = median_composite(&[&a, &b, &c]).unwrap();
        assert_relative_eq!(median[[0, 0]], 2.0);
        assert_relative_eq!(median[[0, 1]], 20.0);
        assert!(median[[1, 0]].is_nan());
        // two valid samples left: 4 and 2
        assert_relative_eq!(median[[1, 1]], 3.0);
    }

    #[test]
    fn test_median_composite_rejects_mismatched_grids() {
        let a = Array2::<f32>::zeros((2, 2));
        let b = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            median_composite(&[&a, &b]),
            Err(ChangeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregate_empty_is_not_an_error() {
        let archive = FixedArchive { scenes: Vec::new() };
        let aggregator = TemporalAggregator::new(&archive, SceneFilter::default());

        let result = aggregator.aggregate(&bbox(), &window(), "baseline").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_aggregate_reduces_selected_band() {
        let archive = FixedArchive {
            scenes: vec![
                scene("a", "VV", Array2::from_elem((2, 2), -10.0)),
                scene("b", "VV", Array2::from_elem((2, 2), -12.0)),
                scene("c", "VV", Array2::from_elem((2, 2), -11.0)),
                scene("d", "VH", Array2::from_elem((2, 2), -20.0)),
            ],
        };
        let aggregator = TemporalAggregator::new(&archive, SceneFilter::default());

        let image = aggregator
            .aggregate(&bbox(), &window(), "baseline")
            .unwrap()
            .into_image()
            .unwrap();
        assert_eq!(image.scene_count, 3);
        let band = image.primary_band().unwrap();
        assert_eq!(band.name, "VV");
        assert!(band.data.iter().all(|&v| v == -11.0));
    }

    #[test]
    fn test_missing_band_fails_band_check() {
        let archive = FixedArchive {
            scenes: vec![scene("a", "VH", Array2::from_elem((2, 2), -20.0))],
        };
        let aggregator = TemporalAggregator::new(&archive, SceneFilter::default());

        let image = aggregator
            .aggregate(&bbox(), &window(), "comparison")
            .unwrap()
            .into_image()
            .unwrap();
        assert!(matches!(
            check_image_bands(image, "comparison"),
            Err(ChangeError::NoBands { period }) if period == "comparison"
        ));
    }

    #[test]
    fn test_collect_scenes_keeps_only_filter_band() {
        let mut dual = scene("dual", "VV", Array2::zeros((1, 1)));
        dual.bands.push(BandImage::new("VH", Array2::zeros((1, 1))));
        let archive = FixedArchive {
            scenes: vec![dual, scene("vh-only", "VH", Array2::zeros((1, 1)))],
        };
        let aggregator = TemporalAggregator::new(&archive, SceneFilter::default());

        let scenes = aggregator.collect_scenes(&bbox(), Some(&window())).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].id, "dual");
        assert_eq!(scenes[0].bands.len(), 1);
        assert_eq!(scenes[0].bands[0].name, "VV");
    }
}
