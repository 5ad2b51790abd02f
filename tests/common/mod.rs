#![allow(dead_code)]

use chrono::NaiveDate;
use ndarray::Array2;
use sarchange::core::poll::{CancelToken, Sleeper};
use sarchange::io::archive::{
    ExportJob, ExportService, SceneArchive, SceneQuery, TaskId, TaskState, TaskStatus,
};
use sarchange::{BandImage, ChangeError, ChangeResult, DateRange, Scene};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Never blocks
#[derive(Default)]
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Archive answering from a fixed scene list, honouring the date window
pub struct MemoryArchive {
    pub scenes: Vec<Scene>,
    pub queries: RefCell<Vec<Option<DateRange>>>,
}

impl MemoryArchive {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes,
            queries: RefCell::new(Vec::new()),
        }
    }

    fn matching(&self, query: &SceneQuery<'_>) -> Vec<Scene> {
        self.queries.borrow_mut().push(query.window);
        self.scenes
            .iter()
            .filter(|scene| match (query.window, scene.acquired) {
                (None, _) => true,
                (Some(window), Some(date)) => window.contains(date),
                (Some(_), None) => false,
            })
            .cloned()
            .collect()
    }
}

impl SceneArchive for MemoryArchive {
    fn count(&self, query: &SceneQuery<'_>) -> ChangeResult<usize> {
        Ok(self.matching(query).len())
    }

    fn scenes(&self, query: &SceneQuery<'_>) -> ChangeResult<Vec<Scene>> {
        Ok(self.matching(query))
    }
}

/// Export service replaying scripted task states
pub struct MemoryExports {
    pub submitted: RefCell<Vec<String>>,
    pub rasters: RefCell<Vec<BandImage>>,
    states: RefCell<VecDeque<TaskState>>,
    idle_state: TaskState,
    reject_submissions: bool,
    cancel_on_submit: Option<CancelToken>,
}

impl MemoryExports {
    /// Every task completes on its first status poll
    pub fn completing() -> Self {
        Self::scripted(&[], TaskState::Completed)
    }

    /// Tasks report `states` in order, then `idle_state` forever
    pub fn scripted(states: &[TaskState], idle_state: TaskState) -> Self {
        Self {
            submitted: RefCell::new(Vec::new()),
            rasters: RefCell::new(Vec::new()),
            states: RefCell::new(states.iter().copied().collect()),
            idle_state,
            reject_submissions: false,
            cancel_on_submit: None,
        }
    }

    /// Tasks stay in `idle_state`; the first accepted submission cancels `token`
    pub fn cancelling(token: CancelToken, idle_state: TaskState) -> Self {
        Self {
            cancel_on_submit: Some(token),
            ..Self::scripted(&[], idle_state)
        }
    }

    /// Every submission fails with a remote-service error
    pub fn unavailable() -> Self {
        Self {
            reject_submissions: true,
            ..Self::completing()
        }
    }
}

impl ExportService for MemoryExports {
    fn submit(&self, job: &ExportJob<'_>) -> ChangeResult<TaskId> {
        if self.reject_submissions {
            return Err(ChangeError::Remote("503 Service Unavailable".to_string()));
        }
        self.submitted.borrow_mut().push(job.description.clone());
        self.rasters.borrow_mut().push(job.raster.clone());
        if let Some(token) = &self.cancel_on_submit {
            token.cancel();
        }
        Ok(TaskId(format!("task-{}", self.submitted.borrow().len())))
    }

    fn status(&self, _task: &TaskId) -> ChangeResult<TaskStatus> {
        let state = self
            .states
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.idle_state);
        Ok(TaskStatus {
            state,
            error_message: None,
        })
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Single-band VV scene filled with `value`
pub fn vv_scene(id: &str, acquired: &str, value: f32) -> Scene {
    Scene {
        id: id.to_string(),
        acquired: Some(date(acquired)),
        bands: vec![BandImage::new("VV", Array2::from_elem((3, 3), value))],
    }
}

/// Single-band VH scene filled with `value`
pub fn vh_scene(id: &str, acquired: &str, value: f32) -> Scene {
    Scene {
        id: id.to_string(),
        acquired: Some(date(acquired)),
        bands: vec![BandImage::new("VH", Array2::from_elem((3, 3), value))],
    }
}

/// Map export with one square polygon spanning lon -10..-9, lat 40..41
pub fn map_document(baseline: (&str, &str), comparison: (&str, &str)) -> String {
    format!(
        r#"{{
            "type": "FeatureCollection",
            "features": [
                {{
                    "type": "Feature",
                    "properties": {{}},
                    "geometry": {{
                        "type": "Polygon",
                        "coordinates": [[[-10, 40], [-9, 40], [-9, 41], [-10, 41], [-10, 40]]]
                    }}
                }}
            ],
            "baseline_period": {{"start_date": "{}", "end_date": "{}"}},
            "comparison_period": {{"start_date": "{}", "end_date": "{}"}}
        }}"#,
        baseline.0, baseline.1, comparison.0, comparison.1
    )
}
