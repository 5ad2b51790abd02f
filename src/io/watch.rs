use crate::core::poll::{PollOutcome, Poller};
use crate::types::{ChangeError, ChangeResult};
use std::path::{Path, PathBuf};

/// User's downloads directory, where the drawing map exports its file
pub fn downloads_dir() -> ChangeResult<PathBuf> {
    if let Some(dir) = dirs::download_dir() {
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join("Downloads"))
        .ok_or_else(|| ChangeError::Config("Cannot determine the downloads directory".to_string()))
}

/// Waits for a file produced by an external collaborator
pub struct FileWatcher {
    poller: Poller,
}

impl FileWatcher {
    pub fn new(poller: Poller) -> Self {
        Self { poller }
    }

    /// Remove a leftover file from a previous run so the wait observes a fresh export
    pub fn discard_stale<P: AsRef<Path>>(path: P) -> ChangeResult<bool> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("{} already exists. Overwriting the file...", path.display());
            std::fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Block until `path` exists.
    ///
    /// Returns `TimedOut` / `Cancelled` errors when the poller gives up first.
    pub fn wait_for<P: AsRef<Path>>(&self, path: P) -> ChangeResult<PathBuf> {
        let path = path.as_ref();
        let what = path.display().to_string();

        let outcome = self.poller.poll(|attempt| {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            if attempt == 0 {
                log::info!("Waiting for {} ...", what);
            } else {
                log::debug!("Still waiting for {} (attempt {})", what, attempt + 1);
            }
            Ok(None)
        })?;

        match outcome {
            PollOutcome::Ready(found) => {
                log::info!("Found {}", found.display());
                Ok(found)
            }
            PollOutcome::TimedOut { .. } => Err(ChangeError::TimedOut { what }),
            PollOutcome::Cancelled => Err(ChangeError::Cancelled { what }),
        }
    }
}
