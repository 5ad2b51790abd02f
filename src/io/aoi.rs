use crate::types::{BoundingBox, ChangeError, ChangeResult, TimeWindow, NOT_AVAILABLE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Exported map document: drawn features plus the two analysis periods
#[derive(Debug, Deserialize)]
pub struct AoiDocument {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub baseline_period: Option<PeriodFields>,
    #[serde(default)]
    pub comparison_period: Option<PeriodFields>,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodFields {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl PeriodFields {
    fn to_window(&self) -> TimeWindow {
        TimeWindow::new(
            self.start_date.as_deref().unwrap_or(NOT_AVAILABLE),
            self.end_date.as_deref().unwrap_or(NOT_AVAILABLE),
        )
    }
}

/// Resolved analysis request
#[derive(Debug, Clone, PartialEq)]
pub struct AoiRequest {
    pub bbox: BoundingBox,
    pub baseline: TimeWindow,
    pub comparison: TimeWindow,
}

#[derive(Serialize)]
struct RequestSummary<'a> {
    baseline_period: &'a TimeWindow,
    comparison_period: &'a TimeWindow,
    coordinates: CoordinateSummary,
}

#[derive(Serialize)]
struct CoordinateSummary {
    min_latitude: f64,
    max_latitude: f64,
    min_longitude: f64,
    max_longitude: f64,
}

impl AoiRequest {
    /// JSON summary of the periods and extent
    pub fn summary(&self) -> ChangeResult<String> {
        let summary = RequestSummary {
            baseline_period: &self.baseline,
            comparison_period: &self.comparison,
            coordinates: CoordinateSummary {
                min_latitude: self.bbox.min_lat,
                max_latitude: self.bbox.max_lat,
                min_longitude: self.bbox.min_lon,
                max_longitude: self.bbox.max_lon,
            },
        };
        Ok(serde_json::to_string_pretty(&summary)?)
    }
}

/// Turns an exported map document into a bounding box and two time windows
pub struct AoiResolver;

impl AoiResolver {
    /// Read and resolve an exported map file
    pub fn resolve_file<P: AsRef<Path>>(path: P) -> ChangeResult<AoiRequest> {
        log::info!("Reading AOI document: {}", path.as_ref().display());
        let content = std::fs::read_to_string(&path)?;
        Self::resolve_str(&content)
    }

    pub fn resolve_str(content: &str) -> ChangeResult<AoiRequest> {
        let document: AoiDocument = serde_json::from_str(content)?;
        Self::resolve(&document)
    }

    pub fn resolve(document: &AoiDocument) -> ChangeResult<AoiRequest> {
        let points = Self::extract_coordinates(document)?;
        let bbox = BoundingBox::from_points(&points).ok_or(ChangeError::NoCoordinates)?;

        log::info!("Min Longitude: {}", bbox.min_lon);
        log::info!("Min Latitude: {}", bbox.min_lat);
        log::info!("Max Longitude: {}", bbox.max_lon);
        log::info!("Max Latitude: {}", bbox.max_lat);

        let baseline = document
            .baseline_period
            .as_ref()
            .map(PeriodFields::to_window)
            .unwrap_or_else(|| PeriodFields::default().to_window());
        let comparison = document
            .comparison_period
            .as_ref()
            .map(PeriodFields::to_window)
            .unwrap_or_else(|| PeriodFields::default().to_window());

        log::info!(
            "Baseline Period: Start: {}, End: {}",
            baseline.start_date, baseline.end_date
        );
        log::info!(
            "Comparison Period: Start: {}, End: {}",
            comparison.start_date, comparison.end_date
        );

        let request = AoiRequest {
            bbox,
            baseline,
            comparison,
        };
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Resolved request: {}", request.summary()?);
        }

        Ok(request)
    }

    /// Outer-ring positions of every Polygon feature, as (lon, lat)
    pub fn extract_coordinates(document: &AoiDocument) -> ChangeResult<Vec<(f64, f64)>> {
        let mut points = Vec::new();

        for (index, feature) in document.features.iter().enumerate() {
            let geometry = match &feature.geometry {
                Some(geometry) if geometry.kind == "Polygon" => geometry,
                Some(geometry) => {
                    log::debug!("Skipping feature {} with {} geometry", index, geometry.kind);
                    continue;
                }
                None => continue,
            };

            let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(geometry.coordinates.clone())
                .map_err(|e| {
                    ChangeError::InvalidInput(format!(
                        "Feature {} has malformed polygon coordinates: {}",
                        index, e
                    ))
                })?;

            let Some(outer) = rings.first() else {
                continue;
            };

            for position in outer {
                match position.as_slice() {
                    [lon, lat, ..] => points.push((*lon, *lat)),
                    _ => {
                        return Err(ChangeError::InvalidInput(format!(
                            "Feature {} has a position with fewer than two values",
                            index
                        )))
                    }
                }
            }
        }

        if points.is_empty() {
            return Err(ChangeError::NoCoordinates);
        }

        log::debug!("Collected {} polygon positions", points.len());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
             "coordinates": [[[-10, 40], [-10, 41], [-9, 41], [-9, 40], [-10, 40]]]}}
        ],
        "baseline_period": {"start_date": "2023-01-01", "end_date": "2023-01-10"},
        "comparison_period": {"start_date": "2023-02-01", "end_date": "2023-02-10"}
    }"#;

    #[test]
    fn test_resolve_example() {
        let request = AoiResolver::resolve_str(EXAMPLE).unwrap();
        assert_eq!(
            request.bbox,
            BoundingBox {
                min_lon: -10.0,
                max_lon: -9.0,
                min_lat: 40.0,
                max_lat: 41.0
            }
        );
        assert_eq!(request.baseline, TimeWindow::new("2023-01-01", "2023-01-10"));
        assert_eq!(request.comparison, TimeWindow::new("2023-02-01", "2023-02-10"));
    }

    #[test]
    fn test_missing_periods_default_to_sentinel() {
        let json = r#"{"features": [{"geometry": {"type": "Polygon",
            "coordinates": [[[1, 2], [3, 4], [1, 2]]]}}],
            "baseline_period": {"start_date": "2023-01-01"}}"#;
        let request = AoiResolver::resolve_str(json).unwrap();
        assert_eq!(request.baseline.start_date, "2023-01-01");
        assert_eq!(request.baseline.end_date, NOT_AVAILABLE);
        assert_eq!(request.comparison, TimeWindow::new(NOT_AVAILABLE, NOT_AVAILABLE));
    }

    #[test]
    fn test_only_outer_ring_and_polygons_count() {
        let json = r#"{"features": [
            {"geometry": {"type": "Point", "coordinates": [100, 80]}},
            {"geometry": {"type": "LineString", "coordinates": [[50, 50], [60, 60]]}},
            {"geometry": null},
            {"properties": {}},
            {"geometry": {"type": "Polygon", "coordinates": [
                [[0, 0], [0, 1], [1, 1, 250.0], [0, 0]],
                [[-50, -50], [-50, 50], [50, 50], [-50, -50]]
            ]}}
        ]}"#;
        let request = AoiResolver::resolve_str(json).unwrap();
        assert_eq!(request.bbox.as_rectangle(), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_no_coordinates() {
        for json in [
            r#"{"features": []}"#,
            r#"{}"#,
            r#"{"features": [{"geometry": {"type": "Point", "coordinates": [1, 2]}}]}"#,
        ] {
            assert!(matches!(
                AoiResolver::resolve_str(json),
                Err(ChangeError::NoCoordinates)
            ));
        }
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            AoiResolver::resolve_str("{not json"),
            Err(ChangeError::Json(_))
        ));

        let json = r#"{"features": [{"geometry": {"type": "Polygon", "coordinates": [[[1]]]}}]}"#;
        assert!(matches!(
            AoiResolver::resolve_str(json),
            Err(ChangeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_summary_shape() {
        let request = AoiResolver::resolve_str(EXAMPLE).unwrap();
        let summary: serde_json::Value = serde_json::from_str(&request.summary().unwrap()).unwrap();
        assert_eq!(summary["coordinates"]["min_longitude"], -10.0);
        assert_eq!(summary["comparison_period"]["end_date"], "2023-02-10");
    }
}
