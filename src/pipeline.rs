//! End-to-end change detection over one resolved AOI request
//!
//! Stages run strictly in order: window validation, baseline aggregation,
//! comparison aggregation, differencing, export, script rendering.

use crate::config::PipelineConfig;
use crate::core::aggregate::{
    check_image_bands, Aggregate, RepresentativeImage, TemporalAggregator,
};
use crate::core::change::{
    ChangeDetector, ChangeRaster, LandCoverMask, SignificantChangeMask, WaterFilter,
};
use crate::core::export::{ExportOrchestrator, ExportOutcome};
use crate::core::poll::{CancelToken, Sleeper, ThreadSleeper};
use crate::core::script::{maps_link, ScriptRenderer, VisParams};
use crate::io::aoi::AoiRequest;
use crate::io::archive::{ExportService, SceneArchive};
use crate::types::{BoundingBox, ChangeError, ChangeResult, DateRange};
use serde::Deserialize;
use std::sync::Arc;

/// What to do when a period matches no scenes, and what to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Abort with "no images found" when either period is empty
    #[default]
    Strict,
    /// Fall back to every archived scene over the AOI and compare it with itself
    Fallback,
    /// Export every scene of both periods instead of a change raster
    EnumerateAll,
}

/// Change raster together with its significance mask
#[derive(Debug, Clone)]
pub struct ChangeProduct {
    pub raster: ChangeRaster,
    pub mask: SignificantChangeMask,
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub bbox: BoundingBox,
    pub baseline: DateRange,
    pub comparison: DateRange,
    pub mode: PipelineMode,
    /// Archive-wide images stood in for an empty period
    pub used_fallback: bool,
    /// Absent when scenes were only enumerated
    pub change: Option<ChangeProduct>,
    pub exports: Vec<ExportOutcome>,
    pub script: Option<String>,
    pub map_link: String,
}

impl RunReport {
    pub fn all_exports_completed(&self) -> bool {
        !self.exports.is_empty() && self.exports.iter().all(ExportOutcome::is_completed)
    }
}

/// Wires the archive, the change engine and the export service together
pub struct ChangePipeline<'a> {
    archive: &'a dyn SceneArchive,
    exports: &'a dyn ExportService,
    config: PipelineConfig,
    cancel: CancelToken,
    sleeper: Arc<dyn Sleeper>,
    land_cover: Option<LandCoverMask>,
}

impl<'a> ChangePipeline<'a> {
    pub fn new(
        archive: &'a dyn SceneArchive,
        exports: &'a dyn ExportService,
        config: PipelineConfig,
    ) -> Self {
        Self {
            archive,
            exports,
            config,
            cancel: CancelToken::new(),
            sleeper: Arc::new(ThreadSleeper),
            land_cover: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Drop water pixels from the change raster and mask after thresholding.
    ///
    /// The configured `land_mask` only shapes the generated script; the local
    /// raster is masked only when a land-cover grid is supplied here.
    pub fn with_land_cover(mut self, mask: LandCoverMask) -> Self {
        self.land_cover = Some(mask);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, request: &AoiRequest) -> ChangeResult<RunReport> {
        if self.cancel.is_cancelled() {
            return Err(ChangeError::Cancelled {
                what: "change detection run".to_string(),
            });
        }

        let baseline = request.baseline.validate("baseline")?;
        let comparison = request.comparison.validate("comparison")?;
        log::info!(
            "Running {:?} change detection over {:?}: baseline {}, comparison {}",
            self.config.mode,
            request.bbox.as_rectangle(),
            baseline,
            comparison
        );
        if self.config.land_mask.is_some() && self.land_cover.is_none() {
            log::warn!(
                "land_mask is set but no land-cover grid was supplied; \
                 only the generated script will mask water"
            );
        }

        let aggregator = TemporalAggregator::new(self.archive, self.config.filter.clone());
        let orchestrator = ExportOrchestrator::new(
            self.exports,
            self.config
                .task_poller(self.cancel.clone())
                .with_sleeper(Arc::clone(&self.sleeper)),
            self.config.export_settings(),
        );

        let mut report = RunReport {
            bbox: request.bbox,
            baseline,
            comparison,
            mode: self.config.mode,
            used_fallback: false,
            change: None,
            exports: Vec::new(),
            script: None,
            map_link: maps_link(&request.bbox),
        };

        if self.config.mode == PipelineMode::EnumerateAll {
            report.exports = self.enumerate_all(
                &aggregator,
                &orchestrator,
                &request.bbox,
                &baseline,
                &comparison,
            )?;
            log::info!("Area of interest: {}", report.map_link);
            return Ok(report);
        }

        let (before, after) = self.representative_pair(
            &aggregator,
            &request.bbox,
            &baseline,
            &comparison,
            &mut report,
        )?;
        let product = self.detect(before, after)?;

        log::info!("Exporting the change image...");
        let outcome = orchestrator.submit_and_wait(
            &product.raster.band,
            &self.config.export_description,
            &request.bbox,
        )?;
        report.exports.push(outcome);

        let vis = VisParams::default();
        let renderer = ScriptRenderer {
            filter: aggregator.filter(),
            vis: &vis,
            threshold: self.config.threshold,
            land_mask: self.config.land_mask.as_ref(),
        };
        let script = if report.used_fallback {
            renderer.render_archive_wide(&request.bbox)
        } else {
            renderer.render(&request.bbox, &request.baseline, &request.comparison)
        };
        report.script = Some(script);
        report.change = Some(product);

        log::info!("Area of interest: {}", report.map_link);
        Ok(report)
    }

    fn representative_pair(
        &self,
        aggregator: &TemporalAggregator<'_>,
        bbox: &BoundingBox,
        baseline: &DateRange,
        comparison: &DateRange,
        report: &mut RunReport,
    ) -> ChangeResult<(RepresentativeImage, RepresentativeImage)> {
        let strict = self.config.mode == PipelineMode::Strict;
        let before = aggregator.aggregate(bbox, baseline, "baseline")?;
        if strict && before.is_empty() {
            return Err(ChangeError::NoImages {
                period: "baseline".to_string(),
            });
        }
        let after = aggregator.aggregate(bbox, comparison, "comparison")?;

        match (before, after) {
            (Aggregate::Image(before), Aggregate::Image(after)) => Ok((
                check_image_bands(before, "baseline")?,
                check_image_bands(after, "comparison")?,
            )),
            (before, _) if !strict => {
                log::warn!("No images found for the specified date ranges");
                let empty_period = if before.is_empty() { "baseline" } else { "comparison" };
                log::info!("Falling back to all available images for the {} period", empty_period);

                let image = aggregator
                    .aggregate_archive_wide(bbox)?
                    .into_image()
                    .ok_or_else(|| ChangeError::NoImages {
                        period: "archive-wide".to_string(),
                    })?;
                let image = check_image_bands(image, "archive-wide")?;
                report.used_fallback = true;
                Ok((image.clone(), image))
            }
            (before, _) => {
                let period = if before.is_empty() { "baseline" } else { "comparison" };
                Err(ChangeError::NoImages {
                    period: period.to_string(),
                })
            }
        }
    }

    fn detect(
        &self,
        before: RepresentativeImage,
        after: RepresentativeImage,
    ) -> ChangeResult<ChangeProduct> {
        let (before, after) = match self.config.water_threshold_db {
            Some(threshold_db) => {
                let filter = WaterFilter { threshold_db };
                log::debug!("Masking water below {} dB", threshold_db);
                (filter.apply(&before), filter.apply(&after))
            }
            None => (before, after),
        };

        let detector = ChangeDetector::new(self.config.threshold);
        let (mut raster, mut mask) = detector.compute_change(&before, &after)?;

        if let Some(land_cover) = &self.land_cover {
            land_cover.apply(&mut raster, &mut mask)?;
        }

        Ok(ChangeProduct { raster, mask })
    }

    fn enumerate_all(
        &self,
        aggregator: &TemporalAggregator<'_>,
        orchestrator: &ExportOrchestrator<'_>,
        bbox: &BoundingBox,
        baseline: &DateRange,
        comparison: &DateRange,
    ) -> ChangeResult<Vec<ExportOutcome>> {
        let mut outcomes = Vec::new();

        for (period, window, prefix) in [
            ("baseline", baseline, "baseline_period"),
            ("comparison", comparison, "comparison_period"),
        ] {
            if self.cancel.is_cancelled() {
                log::warn!("Cancelled before exporting the {} period", period);
                break;
            }
            log::info!("Exporting images for the {} period...", period);
            let scenes = aggregator.collect_scenes(bbox, Some(window))?;
            outcomes.extend(orchestrator.export_each(&scenes, prefix, bbox)?);
        }

        Ok(outcomes)
    }
}
