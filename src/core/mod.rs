//! Core change-detection modules

pub mod aggregate;
pub mod change;
pub mod export;
pub mod poll;
pub mod script;

// Re-export main types
pub use aggregate::{
    check_image_bands, median_composite, Aggregate, RepresentativeImage, TemporalAggregator,
};
pub use change::{ChangeDetector, ChangeRaster, LandCoverMask, SignificantChangeMask, WaterFilter};
pub use export::{ExportOrchestrator, ExportOutcome, ExportSettings, ExportState};
pub use poll::{CancelToken, PollOutcome, Poller, Sleeper, ThreadSleeper};
pub use script::{maps_link, LandMaskSource, ScriptRenderer, VisParams};
