//! Optional on-disk resumption point for the aggregator.
//!
//! The file holds the cursor together with the counts that are consistent
//! with it, so a restarted aggregator neither recounts nor loses records.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::CheckpointError;
use crate::models::{Cursor, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cursor: Cursor,
    pub snapshot: Snapshot,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no checkpoint was ever written.
    pub async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Write to a sibling temp file, sync, then rename over the old checkpoint.
    pub async fn save(&self, cursor: Cursor, snapshot: &Snapshot) -> Result<(), CheckpointError> {
        let checkpoint = Checkpoint {
            cursor,
            snapshot: snapshot.clone(),
            saved_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&checkpoint)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
