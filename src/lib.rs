//! sarchange: Sentinel-1 backscatter change detection over a drawn area of interest
//!
//! This library turns an exported map document (one or more polygons plus a
//! baseline and a comparison period) into a change raster: the per-pixel
//! difference between the median backscatter of the two periods, with a
//! threshold mask marking significant change, exported through a remote
//! imagery service.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, BandImage, BoundingBox, ChangeError, ChangeResult, DateRange, Polarization,
    Scene, TimeWindow,
};

pub use config::PipelineConfig;
pub use io::{AoiRequest, AoiResolver, ArchiveClient, FileWatcher};
pub use pipeline::{ChangePipeline, ChangeProduct, PipelineMode, RunReport};
