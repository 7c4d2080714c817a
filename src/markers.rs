use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::FetchError;

pub const LOCK_FILE: &str = "lock";
pub const DONE_FILE: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerState {
    NotStarted,
    Locked,
    Done,
}

#[derive(Debug, Clone)]
pub struct RunMarkers {
    dir: PathBuf,
}

impl RunMarkers {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn done_path(&self) -> PathBuf {
        self.dir.join(DONE_FILE)
    }

    /// `Done` wins if both markers exist.
    pub fn state(&self) -> MarkerState {
        if self.done_path().exists() {
            MarkerState::Done
        } else if self.lock_path().exists() {
            MarkerState::Locked
        } else {
            MarkerState::NotStarted
        }
    }

    /// Create the lock; `Ok(false)` when another run already holds it.
    pub fn lock(&self) -> Result<bool, FetchError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
        {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(FetchError::Filesystem(err.to_string())),
        }
    }

    pub fn release(&self) -> Result<(), FetchError> {
        remove_if_exists(&self.lock_path())
    }

    /// Replace the lock with the done marker; the lock goes first so the two
    /// never coexist.
    pub fn complete(&self) -> Result<(), FetchError> {
        self.release()?;
        fs::write(self.done_path(), b"").map_err(|err| FetchError::Filesystem(err.to_string()))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), FetchError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FetchError::Filesystem(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn lifecycle() {
        let temp = tempfile::tempdir().unwrap();
        let markers = RunMarkers::new(temp.path());
        assert_eq!(markers.state(), MarkerState::NotStarted);

        assert!(markers.lock().unwrap());
        assert!(!markers.lock().unwrap());
        assert_eq!(markers.state(), MarkerState::Locked);

        markers.complete().unwrap();
        assert_eq!(markers.state(), MarkerState::Done);
        assert!(!markers.lock_path().exists());
    }

    #[test]
    fn stuck_lock_is_never_marked_done() {
        let temp = tempfile::tempdir().unwrap();
        let markers = RunMarkers::new(temp.path());
        fs::create_dir(markers.lock_path()).unwrap();
        fs::write(markers.lock_path().join("held"), b"").unwrap();

        assert_matches!(markers.complete(), Err(FetchError::Filesystem(_)));
        assert!(!markers.done_path().exists());
        assert_eq!(markers.state(), MarkerState::Locked);
    }

    #[test]
    fn done_takes_precedence() {
        let temp = tempfile::tempdir().unwrap();
        let markers = RunMarkers::new(temp.path());
        fs::write(markers.lock_path(), b"").unwrap();
        fs::write(markers.done_path(), b"").unwrap();
        assert_eq!(markers.state(), MarkerState::Done);
    }
}
