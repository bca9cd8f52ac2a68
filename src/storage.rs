use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const OUTPUT_FILENAME: &str = "processed_leaf.jpeg";
/// URL prefix the output root is served under.
pub const OUTPUT_URL_PREFIX: &str = "/static/output_images";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io { path, source }
}

/// Storage key for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSlot {
    id: String,
}

impl RequestSlot {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Upload and output areas, partitioned per request so concurrent
/// submissions never touch each other's files.
#[derive(Debug, Clone)]
pub struct ImageStore {
    upload_root: PathBuf,
    output_root: PathBuf,
    retention: usize,
}

impl ImageStore {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        retention: usize,
    ) -> Self {
        ImageStore {
            upload_root: upload_root.into(),
            output_root: output_root.into(),
            retention: retention.max(1),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub async fn prepare(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.upload_root)
            .await
            .map_err(io_error(&self.upload_root))?;
        fs::create_dir_all(&self.output_root)
            .await
            .map_err(io_error(&self.output_root))?;
        Ok(())
    }

    pub fn allocate(&self) -> RequestSlot {
        RequestSlot {
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Writes the upload under the slot, keeping `filename` so override
    /// lookups by name still match.
    pub async fn save_upload(
        &self,
        slot: &RequestSlot,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.upload_root.join(&slot.id);
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;

        let path = dir.join(filename);
        fs::write(&path, bytes).await.map_err(io_error(&path))?;
        debug!(path = %path.display(), size = bytes.len(), "stored upload");
        Ok(path)
    }

    /// Creates the slot's output directory and returns the file path to write.
    pub async fn output_path(&self, slot: &RequestSlot) -> Result<PathBuf, StorageError> {
        let dir = self.output_root.join(&slot.id);
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
        Ok(dir.join(OUTPUT_FILENAME))
    }

    pub fn output_url(&self, slot: &RequestSlot) -> String {
        format!("{}/{}/{}", OUTPUT_URL_PREFIX, slot.id, OUTPUT_FILENAME)
    }

    pub async fn discard_upload(&self, slot: &RequestSlot) {
        let dir = self.upload_root.join(&slot.id);
        if let Err(err) = fs::remove_dir_all(&dir).await {
            warn!(path = %dir.display(), %err, "failed to remove upload");
        }
    }

    pub fn latest_url(&self) -> String {
        format!("{}/{}", OUTPUT_URL_PREFIX, OUTPUT_FILENAME)
    }

    /// Copies a finished output to `<output_root>/processed_leaf.jpeg`, the
    /// image shown by the demo page. The rename keeps readers from seeing a
    /// partial file.
    pub async fn publish_latest(
        &self,
        slot: &RequestSlot,
        output_path: &Path,
    ) -> Result<(), StorageError> {
        let staging = self
            .output_root
            .join(format!(".{}.{}", slot.id, OUTPUT_FILENAME));
        let latest = self.output_root.join(OUTPUT_FILENAME);

        fs::copy(output_path, &staging)
            .await
            .map_err(io_error(&staging))?;
        fs::rename(&staging, &latest)
            .await
            .map_err(io_error(&latest))?;
        Ok(())
    }

    /// Deletes all but the newest `retention` finished output directories.
    /// Directories without an output file belong to requests still in flight
    /// and are never removed. Returns how many were removed.
    pub async fn prune_outputs(&self) -> Result<usize, StorageError> {
        let mut entries = fs::read_dir(&self.output_root)
            .await
            .map_err(io_error(&self.output_root))?;

        let mut dirs: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error(&self.output_root))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                match fs::try_exists(path.join(OUTPUT_FILENAME)).await {
                    Ok(true) => {}
                    _ => continue,
                }
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                dirs.push((modified, path));
            }
        }

        if dirs.len() <= self.retention {
            return Ok(0);
        }

        dirs.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, path) in dirs.into_iter().skip(self.retention) {
            match fs::remove_dir_all(&path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), %err, "failed to prune output"),
            }
        }
        debug!(removed, "pruned old outputs");
        Ok(removed)
    }
}
