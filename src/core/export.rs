use crate::core::poll::{PollOutcome, Poller};
use crate::io::archive::{ExportJob, ExportService, TaskId, TaskState};
use crate::types::{BandImage, BoundingBox, ChangeResult, Scene};
use regex::Regex;
use std::sync::OnceLock;

/// Export parameters shared by every job of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    /// Metres per pixel
    pub scale: f64,
    pub max_pixels: f64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            scale: 10.0,
            max_pixels: 1e13,
        }
    }
}

/// Client-side view of an export job
#[derive(Debug, Clone, PartialEq)]
pub enum ExportState {
    Submitted,
    Active,
    Completed,
    Failed(String),
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Completed | ExportState::Failed(_))
    }

    fn from_remote(state: TaskState, message: Option<String>) -> Self {
        match state {
            TaskState::Ready | TaskState::Running => ExportState::Active,
            TaskState::Completed => ExportState::Completed,
            TaskState::Failed => {
                ExportState::Failed(message.unwrap_or_else(|| "export task failed".to_string()))
            }
            TaskState::Cancelled => ExportState::Failed(
                message.unwrap_or_else(|| "export task was cancelled remotely".to_string()),
            ),
        }
    }
}

/// How waiting on an export ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed { task: TaskId },
    Failed { reason: String },
    TimedOut { task: TaskId },
    /// `task` is `None` when the job was never submitted
    Cancelled { task: Option<TaskId> },
}

impl ExportOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExportOutcome::Completed { .. })
    }
}

fn description_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_,:;.\-]").expect("valid description pattern"))
}

/// Restrict an export description to `[A-Za-z0-9_,:;.-]{1,100}`
pub fn sanitize_description(description: &str) -> String {
    let cleaned = description_pattern().replace_all(description.trim(), "_");
    let truncated: String = cleaned.chars().take(100).collect();
    if truncated.is_empty() {
        "export".to_string()
    } else {
        truncated
    }
}

/// Submits export jobs and waits for them to reach a terminal state
pub struct ExportOrchestrator<'a> {
    service: &'a dyn ExportService,
    poller: Poller,
    settings: ExportSettings,
}

impl<'a> ExportOrchestrator<'a> {
    pub fn new(service: &'a dyn ExportService, poller: Poller, settings: ExportSettings) -> Self {
        Self {
            service,
            poller,
            settings,
        }
    }

    /// Export one raster and block until it completes, fails, times out or is cancelled.
    ///
    /// Remote-service errors are logged and reported as `Failed`; other errors propagate.
    pub fn submit_and_wait(
        &self,
        raster: &BandImage,
        description: &str,
        region: &BoundingBox,
    ) -> ChangeResult<ExportOutcome> {
        match self.run_job(raster, description, region) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_remote() => {
                log::error!("An error occurred during export: {}", e);
                Ok(ExportOutcome::Failed {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// One job per scene, described as `{prefix}_image_{i}`, run one after another
    pub fn export_each(
        &self,
        scenes: &[Scene],
        prefix: &str,
        region: &BoundingBox,
    ) -> ChangeResult<Vec<ExportOutcome>> {
        let mut outcomes = Vec::with_capacity(scenes.len());

        for (i, scene) in scenes.iter().enumerate() {
            if self.poller.cancel_token().is_cancelled() {
                log::warn!(
                    "Cancelled before exporting {} of {} {} images",
                    scenes.len() - i,
                    scenes.len(),
                    prefix
                );
                break;
            }

            let Some(band) = scene.bands.first() else {
                log::warn!("Scene {} has no bands to export", scene.id);
                outcomes.push(ExportOutcome::Failed {
                    reason: format!("scene {} has no bands", scene.id),
                });
                continue;
            };

            let description = format!("{}_image_{}", prefix, i);
            let outcome = self.submit_and_wait(band, &description, region)?;
            log::info!("Export task for image {} ({}): {:?}", i, scene.id, outcome);
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn run_job(
        &self,
        raster: &BandImage,
        description: &str,
        region: &BoundingBox,
    ) -> ChangeResult<ExportOutcome> {
        let job = ExportJob {
            raster,
            description: sanitize_description(description),
            region: *region,
            scale: self.settings.scale,
            max_pixels: self.settings.max_pixels,
        };

        log::debug!(
            "Submitting export {} (scale {} m, max pixels {:e})",
            job.description, job.scale, job.max_pixels
        );
        if self.poller.cancel_token().is_cancelled() {
            log::warn!("Cancelled before submitting export {}", job.description);
            return Ok(ExportOutcome::Cancelled { task: None });
        }

        let task = self.service.submit(&job)?;
        let mut state = ExportState::Submitted;
        log::info!("Export task {} started ({:?})", task, state);

        let outcome = self.poller.poll(|_| {
            let status = self.service.status(&task)?;
            let next = ExportState::from_remote(status.state, status.error_message);
            if next != state {
                log::info!("Export task {}: {:?} -> {:?}", task, state, next);
                state = next;
            } else {
                log::info!("Waiting for task {} to complete...", task);
            }

            Ok(if state.is_terminal() { Some(state.clone()) } else { None })
        })?;

        Ok(match outcome {
            PollOutcome::Ready(ExportState::Completed) => {
                log::info!("Export task {} completed", task);
                ExportOutcome::Completed { task }
            }
            PollOutcome::Ready(ExportState::Failed(reason)) => {
                log::error!("Export task {} failed: {}", task, reason);
                ExportOutcome::Failed { reason }
            }
            PollOutcome::Ready(other) => ExportOutcome::Failed {
                reason: format!("export task {} stopped in state {:?}", task, other),
            },
            PollOutcome::TimedOut { elapsed } => {
                log::warn!("Gave up on export task {} after {:?}", task, elapsed);
                ExportOutcome::TimedOut { task }
            }
            PollOutcome::Cancelled => ExportOutcome::Cancelled { task: Some(task) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::poll::{CancelToken, Sleeper};
    use crate::io::archive::TaskStatus;
    use crate::types::ChangeError;
    use ndarray::Array2;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    /// Replays a scripted sequence of task states
    struct ScriptedService {
        submit_error: Option<fn() -> ChangeError>,
        states: RefCell<VecDeque<TaskState>>,
        submitted: RefCell<Vec<String>>,
    }

    impl ScriptedService {
        fn new(states: &[TaskState]) -> Self {
            Self {
                submit_error: None,
                states: RefCell::new(states.iter().copied().collect()),
                submitted: RefCell::new(Vec::new()),
            }
        }
    }

    impl ExportService for ScriptedService {
        fn submit(&self, job: &ExportJob<'_>) -> ChangeResult<TaskId> {
            if let Some(make_error) = self.submit_error {
                return Err(make_error());
            }
            self.submitted.borrow_mut().push(job.description.clone());
            Ok(TaskId(format!("task-{}", self.submitted.borrow().len())))
        }

        fn status(&self, _task: &TaskId) -> ChangeResult<TaskStatus> {
            let state = self
                .states
                .borrow_mut()
                .pop_front()
                .unwrap_or(TaskState::Running);
            Ok(TaskStatus {
                state,
                error_message: None,
            })
        }
    }

    /// Cancels the run as soon as the first job is accepted
    struct CancellingService {
        inner: ScriptedService,
        cancel: CancelToken,
    }

    impl ExportService for CancellingService {
        fn submit(&self, job: &ExportJob<'_>) -> ChangeResult<TaskId> {
            let task = self.inner.submit(job)?;
            self.cancel.cancel();
            Ok(task)
        }

        fn status(&self, task: &TaskId) -> ChangeResult<TaskStatus> {
            self.inner.status(task)
        }
    }

    fn poller() -> Poller {
        Poller::new(Duration::from_secs(10)).with_sleeper(Arc::new(NoSleep))
    }

    fn region() -> BoundingBox {
        BoundingBox {
            min_lon: 0.0,
            max_lon: 1.0,
            min_lat: 0.0,
            max_lat: 1.0,
        }
    }

    fn raster() -> BandImage {
        BandImage::new("Change", Array2::zeros((2, 2)))
    }

    #[test]
    fn test_completes_after_active_polls() {
        let service =
            ScriptedService::new(&[TaskState::Ready, TaskState::Running, TaskState::Completed]);
        let orchestrator = ExportOrchestrator::new(&service, poller(), ExportSettings::default());

        let outcome = orchestrator
            .submit_and_wait(&raster(), "area_of_interest", &region())
            .unwrap();
        assert_eq!(
            outcome,
            ExportOutcome::Completed {
                task: TaskId("task-1".to_string())
            }
        );
        assert!(service.states.borrow().is_empty());
    }

    #[test]
    fn test_remote_failure_state() {
        let service = ScriptedService::new(&[TaskState::Running, TaskState::Failed]);
        let orchestrator = ExportOrchestrator::new(&service, poller(), ExportSettings::default());

        let outcome = orchestrator
            .submit_and_wait(&raster(), "area_of_interest", &region())
            .unwrap();
        assert!(matches!(outcome, ExportOutcome::Failed { .. }));
    }

    #[test]
    fn test_submission_remote_error_is_swallowed() {
        let mut service = ScriptedService::new(&[]);
        service.submit_error = Some(|| ChangeError::Remote("503 Service Unavailable".to_string()));
        let orchestrator = ExportOrchestrator::new(&service, poller(), ExportSettings::default());

        match orchestrator.submit_and_wait(&raster(), "area_of_interest", &region()) {
            Ok(ExportOutcome::Failed { reason }) => assert!(reason.contains("503")),
            other => panic!("expected a failed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_error_propagates() {
        let mut service = ScriptedService::new(&[]);
        service.submit_error = Some(|| ChangeError::Config("bad export settings".to_string()));
        let orchestrator = ExportOrchestrator::new(&service, poller(), ExportSettings::default());

        assert!(matches!(
            orchestrator.submit_and_wait(&raster(), "area_of_interest", &region()),
            Err(ChangeError::Config(_))
        ));
    }

    #[test]
    fn test_job_that_never_finishes_times_out() {
        let service = ScriptedService::new(&[]);
        let poller = poller().with_timeout(Some(Duration::from_secs(60)));
        let orchestrator = ExportOrchestrator::new(&service, poller, ExportSettings::default());

        let outcome = orchestrator
            .submit_and_wait(&raster(), "area_of_interest", &region())
            .unwrap();
        assert!(matches!(outcome, ExportOutcome::TimedOut { .. }));
    }

    #[test]
    fn test_export_each_names_jobs() {
        let service = ScriptedService::new(&[TaskState::Completed, TaskState::Completed]);
        let orchestrator = ExportOrchestrator::new(&service, poller(), ExportSettings::default());
        let scenes: Vec<Scene> = (0..2)
            .map(|i| Scene {
                id: format!("scene-{}", i),
                acquired: None,
                bands: vec![raster()],
            })
            .collect();

        let outcomes = orchestrator
            .export_each(&scenes, "baseline_period", &region())
            .unwrap();
        assert!(outcomes.iter().all(ExportOutcome::is_completed));
        assert_eq!(
            *service.submitted.borrow(),
            vec!["baseline_period_image_0", "baseline_period_image_1"]
        );
    }

    #[test]
    fn test_cancelled_job_is_never_submitted() {
        let service = ScriptedService::new(&[TaskState::Completed]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let poller = poller().with_cancel_token(cancel);
        let orchestrator = ExportOrchestrator::new(&service, poller, ExportSettings::default());

        let outcome = orchestrator
            .submit_and_wait(&raster(), "area_of_interest", &region())
            .unwrap();
        assert_eq!(outcome, ExportOutcome::Cancelled { task: None });
        assert!(service.submitted.borrow().is_empty());
    }

    #[test]
    fn test_export_each_stops_after_cancellation() {
        let cancel = CancelToken::new();
        let service = CancellingService {
            inner: ScriptedService::new(&[]),
            cancel: cancel.clone(),
        };
        let orchestrator = ExportOrchestrator::new(
            &service,
            poller().with_cancel_token(cancel),
            ExportSettings::default(),
        );
        let scenes: Vec<Scene> = (0..3)
            .map(|i| Scene {
                id: format!("scene-{}", i),
                acquired: None,
                bands: vec![raster()],
            })
            .collect();

        let outcomes = orchestrator
            .export_each(&scenes, "comparison_period", &region())
            .unwrap();
        assert_eq!(
            outcomes,
            vec![ExportOutcome::Cancelled {
                task: Some(TaskId("task-1".to_string()))
            }]
        );
        assert_eq!(*service.inner.submitted.borrow(), vec!["comparison_period_image_0"]);
    }

    #[test]
    fn test_sanitize_description() {
        assert_eq!(sanitize_description("area_of_interest"), "area_of_interest");
        assert_eq!(sanitize_description("my export/2023 01"), "my_export_2023_01");
        assert_eq!(sanitize_description("   "), "export");
        assert_eq!(sanitize_description(&"x".repeat(150)).len(), 100);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExportState::Submitted.is_terminal());
        assert!(!ExportState::Active.is_terminal());
        assert!(ExportState::Completed.is_terminal());
        assert!(ExportState::Failed("x".to_string()).is_terminal());
    }
}
