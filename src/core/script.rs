use crate::io::archive::SceneFilter;
use crate::types::{BoundingBox, TimeWindow};
use serde::Deserialize;

/// Display parameters for one map layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub palette: Vec<String>,
    pub opacity: f32,
}

impl LayerStyle {
    fn to_js(&self) -> String {
        let mut fields = Vec::new();
        if let Some(min) = self.min {
            fields.push(format!("min: {}", min));
        }
        if let Some(max) = self.max {
            fields.push(format!("max: {}", max));
        }
        let palette: Vec<String> = self.palette.iter().map(|c| format!("'{}'", c)).collect();
        fields.push(format!("palette: [{}]", palette.join(", ")));
        fields.push(format!("opacity: {}", self.opacity));
        format!("{{{}}}", fields.join(", "))
    }
}

/// Colour ramps for the "Change Detection" and "Significant Change" layers
#[derive(Debug, Clone, PartialEq)]
pub struct VisParams {
    pub change: LayerStyle,
    pub significant: LayerStyle,
    pub zoom: u8,
}

impl Default for VisParams {
    fn default() -> Self {
        Self {
            change: LayerStyle {
                min: Some(-2.0),
                max: Some(2.0),
                palette: vec!["blue".into(), "white".into(), "red".into()],
                opacity: 0.3,
            },
            significant: LayerStyle {
                min: None,
                max: None,
                palette: vec!["red".into()],
                opacity: 0.6,
            },
            zoom: 10,
        }
    }
}

/// Land-cover image whose water class is masked out of both layers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandMaskSource {
    pub image: String,
    pub band: String,
    pub water_class: u8,
}

impl Default for LandMaskSource {
    fn default() -> Self {
        Self {
            image: "MODIS/006/MCD12Q1/2018_01_01".to_string(),
            band: "LC_Type1".to_string(),
            water_class: 17,
        }
    }
}

/// Code-editor script reproducing the change analysis for visual inspection
#[derive(Debug, Clone)]
pub struct ScriptRenderer<'a> {
    pub filter: &'a SceneFilter,
    pub vis: &'a VisParams,
    pub threshold: f32,
    pub land_mask: Option<&'a LandMaskSource>,
}

impl ScriptRenderer<'_> {
    pub fn render(
        &self,
        bbox: &BoundingBox,
        baseline: &TimeWindow,
        comparison: &TimeWindow,
    ) -> String {
        let mut script = self.geometry(bbox);
        script.push_str(&self.collection("collection1", Some(baseline)));
        script.push('\n');
        script.push_str(&self.collection("collection2", Some(comparison)));
        script.push('\n');
        self.push_layers(&mut script);
        script
    }

    /// Script for a run that fell back to every archived scene over the AOI.
    ///
    /// Both collections are the same undated median, so the change layer is null.
    pub fn render_archive_wide(&self, bbox: &BoundingBox) -> String {
        let mut script = self.geometry(bbox);
        script.push_str(
            "// No scenes in the requested windows: every archived image, compared with itself\n",
        );
        script.push_str(&self.collection("collection1", None));
        script.push_str("var collection2 = collection1;\n\n");
        self.push_layers(&mut script);
        script
    }

    fn geometry(&self, bbox: &BoundingBox) -> String {
        format!(
            "var geometry = ee.Geometry.Rectangle([{}, {}, {}, {}]);\n\n",
            bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
        )
    }

    fn collection(&self, var: &str, window: Option<&TimeWindow>) -> String {
        let date_filter = window
            .map(|w| format!("    .filterDate('{}', '{}')\n", w.start_date, w.end_date))
            .unwrap_or_default();
        format!(
            "var {var} = ee.ImageCollection('{collection}')\n\
             \x20   .filterBounds(geometry)\n\
             {date_filter}\
             \x20   .filter(ee.Filter.listContains('transmitterReceiverPolarisation', '{pol}'))\n\
             \x20   .filter(ee.Filter.eq('instrumentMode', '{mode}'))\n\
             \x20   .select('{band}')\n\
             \x20   .median();\n",
            var = var,
            collection = self.filter.collection,
            date_filter = date_filter,
            pol = self.filter.polarization,
            mode = self.filter.instrument_mode,
            band = self.filter.band,
        )
    }

    fn push_layers(&self, script: &mut String) {
        script.push_str("var change = collection2.subtract(collection1).rename('Change');\n");
        script.push_str(&format!(
            "var significantChange = change.gt({});\n",
            self.threshold
        ));

        let (change_layer, significant_layer) = match self.land_mask {
            Some(source) => {
                script.push_str(&format!(
                    "var landMask = ee.Image('{}').select('{}').eq({}).not();\n",
                    source.image, source.band, source.water_class
                ));
                (
                    "change.updateMask(landMask)",
                    "significantChange.updateMask(significantChange).updateMask(landMask)",
                )
            }
            None => ("change", "significantChange.updateMask(significantChange)"),
        };

        script.push_str(&format!("Map.centerObject(geometry, {});\n", self.vis.zoom));
        script.push_str(&format!(
            "Map.addLayer({}, {}, 'Change Detection');\n",
            change_layer,
            self.vis.change.to_js()
        ));
        script.push_str(&format!(
            "Map.addLayer({}, {}, 'Significant Change');\n",
            significant_layer,
            self.vis.significant.to_js()
        ));
    }
}

/// Map link centred on the area of interest
pub fn maps_link(bbox: &BoundingBox) -> String {
    let (lat, lon) = bbox.center();
    format!("https://www.google.com/maps/@{},{},15z", lat, lon)
}
