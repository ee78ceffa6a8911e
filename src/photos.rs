//! On-disk storage for dispatch photos.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};

use crate::error::{LedgerError, Result};
use crate::model::PhotoStage;

/// Flat directory of uploaded images. Stored paths are bare file names
/// relative to the directory.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>, extensions: &[String]) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(PhotoStore {
            dir,
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lowercased extension of `file_name` if it is on the allow-list.
    pub fn allowed_extension(&self, file_name: &str) -> Result<String> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if ext.is_empty() || !self.extensions.contains(&ext) {
            return Err(LedgerError::validation(format!(
                "unsupported file type for {file_name:?}; allowed: {}",
                self.extensions.join(", ")
            )));
        }
        Ok(ext)
    }

    /// Writes the upload as `dispatch_{batch}_{stage}_{millis}.{ext}` and
    /// returns the stored name.
    pub fn save(&self, batch_id: i64, stage: PhotoStage, file_name: &str, bytes: &[u8]) -> Result<String> {
        let ext = self.allowed_extension(file_name)?;
        if bytes.is_empty() {
            return Err(LedgerError::validation("the uploaded file is empty"));
        }
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let name = format!("dispatch_{batch_id}_{}_{millis}.{ext}", stage.as_str());
            match OpenOptions::new().write(true).create_new(true).open(self.dir.join(&name)) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    debug!("stored photo {name} ({} bytes)", bytes.len());
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Absolute location of a stored name. Names containing path
    /// separators are refused.
    pub fn path_of(&self, stored: &str) -> Option<PathBuf> {
        let candidate = Path::new(stored);
        match candidate.file_name() {
            Some(name) if name == candidate.as_os_str() => Some(self.dir.join(candidate)),
            _ => None,
        }
    }

    /// Deletes a stored file; failures are logged, not returned.
    pub fn remove(&self, stored: &str) {
        let Some(path) = self.path_of(stored) else {
            warn!("refusing to remove photo with unexpected path {stored:?}");
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed photo {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove photo {}: {e}", path.display()),
        }
    }
}
