//! I/O modules for the AOI document, the scene archive and exported rasters

pub mod aoi;
pub mod archive;
#[cfg(feature = "gdal")]
pub mod raster;
pub mod watch;

pub use aoi::{AoiRequest, AoiResolver};
pub use archive::{ArchiveClient, ExportService, SceneArchive, SceneFilter, SceneQuery};
#[cfg(feature = "gdal")]
pub use raster::{RasterReader, RasterSummary};
pub use watch::FileWatcher;
