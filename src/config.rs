//! Run configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! reproduces the stock behaviour: VV/IW Sentinel-1 GRD scenes, a 0.1
//! change threshold, 10 m exports and the two fixed polling intervals.

use crate::core::change::DEFAULT_THRESHOLD;
use crate::core::export::ExportSettings;
use crate::core::poll::{CancelToken, Poller};
use crate::core::script::LandMaskSource;
use crate::io::archive::SceneFilter;
use crate::pipeline::PipelineMode;
use crate::types::{ChangeError, ChangeResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional JSON configuration file
pub const CONFIG_ENV: &str = "SARCHANGE_CONFIG";

/// Parameters for one change-detection run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Significant-change threshold on the backscatter difference
    pub threshold: f32,
    pub mode: PipelineMode,
    pub filter: SceneFilter,

    /// Export scale in metres per pixel
    pub scale: f64,
    pub max_pixels: f64,
    pub export_description: String,

    /// Name of the file the drawing map drops into the downloads directory
    pub input_file_name: String,
    /// Delete a leftover input file before waiting for a fresh one
    pub discard_stale_input: bool,
    pub file_poll_interval_secs: u64,
    pub file_timeout_secs: Option<u64>,
    pub task_poll_interval_secs: u64,
    pub task_timeout_secs: Option<u64>,

    /// Mask backscatter darker than this many dB before differencing
    pub water_threshold_db: Option<f32>,
    /// Land-cover image used for the script's water mask.
    ///
    /// Only the generated script is masked; the local change raster needs a
    /// grid passed to `ChangePipeline::with_land_cover`.
    pub land_mask: Option<LandMaskSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            mode: PipelineMode::Strict,
            filter: SceneFilter::default(),
            scale: 10.0,
            max_pixels: 1e13,
            export_description: "area_of_interest".to_string(),
            input_file_name: "map_data.json".to_string(),
            discard_stale_input: false,
            file_poll_interval_secs: 5,
            file_timeout_secs: None,
            task_poll_interval_secs: 10,
            task_timeout_secs: None,
            water_threshold_db: None,
            land_mask: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ChangeResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ChangeResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// File named by `SARCHANGE_CONFIG`, or the defaults when unset
    pub fn from_env() -> ChangeResult<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => {
                log::debug!("{} not set, using default configuration", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> ChangeResult<()> {
        if !self.threshold.is_finite() {
            return Err(ChangeError::Config(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ChangeError::Config(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        if self.max_pixels.is_nan() || self.max_pixels < 1.0 {
            return Err(ChangeError::Config(format!(
                "max_pixels must be at least 1, got {}",
                self.max_pixels
            )));
        }
        if self.file_poll_interval_secs == 0 || self.task_poll_interval_secs == 0 {
            return Err(ChangeError::Config(
                "poll intervals must be at least one second".to_string(),
            ));
        }
        if self.input_file_name.trim().is_empty() {
            return Err(ChangeError::Config("input_file_name is empty".to_string()));
        }
        if self.filter.band.trim().is_empty() {
            return Err(ChangeError::Config("filter band is empty".to_string()));
        }
        Ok(())
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            scale: self.scale,
            max_pixels: self.max_pixels,
        }
    }

    /// Poller for the input-file wait
    pub fn file_poller(&self, cancel: CancelToken) -> Poller {
        Poller::new(Duration::from_secs(self.file_poll_interval_secs))
            .with_timeout(self.file_timeout_secs.map(Duration::from_secs))
            .with_cancel_token(cancel)
    }

    /// Poller for export tasks
    pub fn task_poller(&self, cancel: CancelToken) -> Poller {
        Poller::new(Duration::from_secs(self.task_poll_interval_secs))
            .with_timeout(self.task_timeout_secs.map(Duration::from_secs))
            .with_cancel_token(cancel)
    }
}
