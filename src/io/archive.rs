use crate::types::{
    AcquisitionMode, BandImage, BoundingBox, ChangeError, ChangeResult, DateRange, Polarization,
    Scene,
};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Sentinel-1 ground range detected collection
pub const DEFAULT_COLLECTION: &str = "COPERNICUS/S1_GRD";

/// Fixed predicate applied to every archive query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFilter {
    pub collection: String,
    pub instrument_mode: AcquisitionMode,
    pub polarization: Polarization,
    /// Band kept from each matched scene
    pub band: String,
}

impl Default for SceneFilter {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            instrument_mode: AcquisitionMode::IW,
            polarization: Polarization::VV,
            band: Polarization::VV.to_string(),
        }
    }
}

/// Scenes intersecting `bbox`, optionally restricted to `window`
#[derive(Debug, Clone, Copy)]
pub struct SceneQuery<'a> {
    pub bbox: BoundingBox,
    pub window: Option<DateRange>,
    pub filter: &'a SceneFilter,
}

impl std::fmt::Display for SceneQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self
            .window
            .map(|w| w.to_string())
            .unwrap_or_else(|| "all dates".to_string());
        write!(
            f,
            "{} {} {} [{}] over {:?}",
            self.filter.collection,
            self.filter.instrument_mode,
            self.filter.polarization,
            window,
            self.bbox.as_rectangle()
        )
    }
}

/// Remote image archive
pub trait SceneArchive {
    /// Number of scenes matching the query
    fn count(&self, query: &SceneQuery<'_>) -> ChangeResult<usize>;

    /// Matched scenes, sampled on the query's bounding box grid
    fn scenes(&self, query: &SceneQuery<'_>) -> ChangeResult<Vec<Scene>>;
}

/// Raster export submitted to the remote service
#[derive(Debug, Clone)]
pub struct ExportJob<'a> {
    pub raster: &'a BandImage,
    pub description: String,
    pub region: BoundingBox,
    /// Metres per pixel
    pub scale: f64,
    pub max_pixels: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote task state as reported by the export service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Asynchronous export service
pub trait ExportService {
    fn submit(&self, job: &ExportJob<'_>) -> ChangeResult<TaskId>;
    fn status(&self, task: &TaskId) -> ChangeResult<TaskStatus>;
}

// Wire format

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    collection: &'a str,
    bbox: [f64; 4],
    datetime: Option<String>,
    instrument_mode: String,
    polarization: String,
    band: &'a str,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    number_matched: usize,
    #[serde(default)]
    scenes: Vec<WireScene>,
}

#[derive(Debug, Deserialize)]
struct WireScene {
    id: String,
    #[serde(default)]
    acquired: Option<NaiveDate>,
    #[serde(default)]
    bands: Vec<WireBand>,
}

/// Row-major band; `null` samples carry no data
#[derive(Debug, Serialize, Deserialize)]
struct WireBand {
    name: String,
    width: usize,
    height: usize,
    data: Vec<Option<f32>>,
}

impl WireBand {
    fn from_band(band: &BandImage) -> Self {
        let (height, width) = band.data.dim();
        Self {
            name: band.name.clone(),
            width,
            height,
            data: band
                .data
                .iter()
                .map(|v| if v.is_finite() { Some(*v) } else { None })
                .collect(),
        }
    }

    fn into_band(self) -> ChangeResult<BandImage> {
        let samples = self.data.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
        let data = Array2::from_shape_vec((self.height, self.width), samples).map_err(|e| {
            ChangeError::Remote(format!(
                "Band {} does not match its {}x{} shape: {}",
                self.name, self.width, self.height, e
            ))
        })?;
        Ok(BandImage::new(self.name, data))
    }
}

impl WireScene {
    fn into_scene(self) -> ChangeResult<Scene> {
        let bands = self
            .bands
            .into_iter()
            .map(WireBand::into_band)
            .collect::<ChangeResult<Vec<_>>>()?;
        Ok(Scene {
            id: self.id,
            acquired: self.acquired,
            bands,
        })
    }
}

#[derive(Debug, Serialize)]
struct ExportRequest<'a> {
    description: &'a str,
    region: [f64; 4],
    scale: f64,
    max_pixels: f64,
    raster: WireBand,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    id: String,
}

/// Blocking JSON client for the scene archive and export service
pub struct ArchiveClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl ArchiveClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> ChangeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Endpoint from `SARCHANGE_ARCHIVE_URL`, bearer token from `SARCHANGE_ARCHIVE_TOKEN`
    pub fn from_env() -> ChangeResult<Self> {
        let base_url = std::env::var("SARCHANGE_ARCHIVE_URL").map_err(|_| {
            ChangeError::Config("SARCHANGE_ARCHIVE_URL is not set".to_string())
        })?;
        let token = std::env::var("SARCHANGE_ARCHIVE_TOKEN").ok();
        Self::new(base_url, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn check(response: reqwest::blocking::Response) -> ChangeResult<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().unwrap_or_default();
        Err(ChangeError::Remote(format!(
            "{} returned {}: {}",
            url,
            status,
            body.trim()
        )))
    }

    fn search(&self, query: &SceneQuery<'_>, limit: Option<usize>) -> ChangeResult<SearchResponse> {
        let body = SearchRequest {
            collection: &query.filter.collection,
            bbox: query.bbox.as_rectangle(),
            datetime: query.window.map(|w| w.to_string()),
            instrument_mode: query.filter.instrument_mode.to_string(),
            polarization: query.filter.polarization.to_string(),
            band: &query.filter.band,
            limit,
        };

        log::debug!("Searching archive: {}", query);
        let response = self
            .authorize(self.client.post(self.url("scenes:search")))
            .json(&body)
            .send()?;

        Ok(Self::check(response)?.json::<SearchResponse>()?)
    }
}

impl SceneArchive for ArchiveClient {
    fn count(&self, query: &SceneQuery<'_>) -> ChangeResult<usize> {
        Ok(self.search(query, Some(0))?.number_matched)
    }

    fn scenes(&self, query: &SceneQuery<'_>) -> ChangeResult<Vec<Scene>> {
        let response = self.search(query, None)?;
        if response.scenes.len() != response.number_matched {
            log::warn!(
                "Archive reported {} matches but returned {} scenes",
                response.number_matched,
                response.scenes.len()
            );
        }
        response.scenes.into_iter().map(WireScene::into_scene).collect()
    }
}

impl ExportService for ArchiveClient {
    fn submit(&self, job: &ExportJob<'_>) -> ChangeResult<TaskId> {
        let body = ExportRequest {
            description: &job.description,
            region: job.region.as_rectangle(),
            scale: job.scale,
            max_pixels: job.max_pixels,
            raster: WireBand::from_band(job.raster),
        };

        let response = self
            .authorize(self.client.post(self.url("exports")))
            .json(&body)
            .send()?;
        let created: ExportResponse = Self::check(response)?.json()?;

        Ok(TaskId(created.id))
    }

    fn status(&self, task: &TaskId) -> ChangeResult<TaskStatus> {
        let response = self
            .authorize(self.client.get(self.url(&format!("exports/{}", task.0))))
            .send()?;
        Ok(Self::check(response)?.json()?)
    }
}
