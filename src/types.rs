use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Real-valued backscatter sample
pub type Backscatter = f32;

/// 2D backscatter raster (rows x cols)
pub type BackscatterImage = Array2<Backscatter>;

/// Value a date field takes when the input document does not provide it
pub const NOT_AVAILABLE: &str = "Not Available";

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(ChangeError::Config(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcquisitionMode::IW => "IW",
            AcquisitionMode::EW => "EW",
            AcquisitionMode::SM => "SM",
            AcquisitionMode::WV => "WV",
        };
        write!(f, "{}", name)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Axis-aligned extent of a set of (lon, lat) points. `None` when empty.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a (f64, f64)>,
    {
        let mut iter = points.into_iter();
        let &(lon, lat) = iter.next()?;
        let mut bbox = BoundingBox {
            min_lon: lon,
            max_lon: lon,
            min_lat: lat,
            max_lat: lat,
        };

        for &(lon, lat) in iter {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }

        Some(bbox)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Centre as (lat, lon)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// West, south, east, north
    pub fn as_rectangle(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Raw date window as it appears in the input document.
///
/// Either field may hold [`NOT_AVAILABLE`]; use [`TimeWindow::validate`]
/// before handing the window to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_date: String,
    pub end_date: String,
}

impl TimeWindow {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }

    /// Parse both fields as ISO calendar dates.
    ///
    /// `period` names the window in error messages ("baseline", "comparison").
    pub fn validate(&self, period: &str) -> ChangeResult<DateRange> {
        let start = parse_date_field(period, "start_date", &self.start_date)?;
        let end = parse_date_field(period, "end_date", &self.end_date)?;

        if start > end {
            log::warn!(
                "{} period starts after it ends ({} > {}); the archive will match nothing",
                period, start, end
            );
        }

        Ok(DateRange { start, end })
    }
}

fn parse_date_field(period: &str, field: &'static str, value: &str) -> ChangeResult<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == NOT_AVAILABLE {
        return Err(ChangeError::MissingTimeWindow {
            period: period.to_string(),
            field,
        });
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| ChangeError::InvalidDate {
        period: period.to_string(),
        field,
        value: value.to_string(),
    })
}

/// Validated date window, half-open `[start, end)` like the archive's date filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

/// A single named raster band. Non-finite samples mean "no data".
#[derive(Debug, Clone, PartialEq)]
pub struct BandImage {
    pub name: String,
    pub data: BackscatterImage,
}

impl BandImage {
    pub fn new(name: impl Into<String>, data: BackscatterImage) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// One archive image
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub acquired: Option<NaiveDate>,
    pub bands: Vec<BandImage>,
}

impl Scene {
    pub fn band(&self, name: &str) -> Option<&BandImage> {
        self.bands.iter().find(|b| b.name == name)
    }
}

/// Error types for change detection
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No coordinates found in the GeoJSON file")]
    NoCoordinates,

    #[error("Missing {field} for the {period} period")]
    MissingTimeWindow { period: String, field: &'static str },

    #[error("Invalid {field} for the {period} period: {value:?} is not a YYYY-MM-DD date")]
    InvalidDate {
        period: String,
        field: &'static str,
        value: String,
    },

    #[error("No images found in the collection for the {period} period")]
    NoImages { period: String },

    #[error("Image for the {period} period does not have any bands")]
    NoBands { period: String },

    #[error("Raster shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out waiting for {what}")]
    TimedOut { what: String },

    #[error("Cancelled while waiting for {what}")]
    Cancelled { what: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl ChangeError {
    /// Failures raised by the remote imagery service or the transport to it
    pub fn is_remote(&self) -> bool {
        matches!(self, ChangeError::Remote(_) | ChangeError::Http(_))
    }
}

/// Result type for change detection operations
pub type ChangeResult<T> = Result<T, ChangeError>;
