//! Per-request temporary files.
//!
//! A [`StagedUpload`] owns every path it hands out and removes them when it
//! is dropped.  Every filesystem step runs on the blocking pool with the
//! guard moved into the task, so a cancelled request can never leave a file
//! that is written after the guard is gone: the guard is dropped once the
//! task finishes, whether or not anyone still awaits it.

use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::imaging::{self, Downscaled, ResizeOptions, TransformError};

#[derive(Debug)]
pub struct StagedUpload {
    original: PathBuf,
    resized: PathBuf,
}

impl StagedUpload {
    /// Write the uploaded bytes to a fresh, uniquely named file in `dir`.
    /// The directory is created if needed.
    pub async fn create(dir: &Path, bytes: Vec<u8>) -> io::Result<Self> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<Self> {
            std::fs::create_dir_all(&dir)?;
            let id = Uuid::new_v4().simple().to_string();
            let staged = Self {
                original: dir.join(&id),
                resized: dir.join(format!("{}_resized.jpg", id)),
            };
            // The guard exists before the write so a partial file is removed too.
            std::fs::write(&staged.original, &bytes)?;
            Ok(staged)
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Downscale the original into [`Self::resized`] and hand the guard back
    /// together with the JPEG bytes.
    pub async fn downscale(
        self,
        opts: ResizeOptions,
    ) -> Result<(Self, Vec<u8>, Downscaled), TransformError> {
        tokio::task::spawn_blocking(move || -> Result<_, TransformError> {
            let (jpeg, info) = imaging::downscale_file(&self.original, &self.resized, opts)?;
            Ok((self, jpeg, info))
        })
        .await
        .map_err(|e| TransformError::Worker(e.to_string()))?
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    /// Destination for the downscaled copy.  Not created by this type.
    pub fn resized(&self) -> &Path {
        &self.resized
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        // May run on a runtime worker; two unlink calls are cheap enough to do
        // inline.
        for path in [&self.original, &self.resized] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "failed to remove staged file");
                }
            }
        }
    }
}
