//! Atomic stream-list persistence (§4.8 supplement). Mirrors the teacher's
//! `write_state_atomic`: write to a sibling temp file, then rename, so a
//! crash mid-write never leaves a half-written config behind. An `fs2`
//! advisory lock guards against two processes racing the same file.

use crate::error::PersistError;
use crate::types::{Stream, StreamId};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// On-disk representation of one registered stream, enough to recreate it
/// (and re-spawn its Supervisor) on the next process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredStream {
    pub id: StreamId,
    pub name: String,
    pub manifest_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Stream> for StoredStream {
    fn from(s: &Stream) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            manifest_url: s.manifest_url.clone(),
            created_at: s.created_at,
        }
    }
}

impl From<StoredStream> for Stream {
    fn from(s: StoredStream) -> Self {
        Stream {
            id: s.id,
            name: s.name,
            manifest_url: s.manifest_url,
            created_at: s.created_at,
        }
    }
}

/// Loads/saves the registered-stream list as a single JSON array at `path`.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored stream list. An absent file is treated as an empty
    /// fleet rather than an error, since that's the expected state on first
    /// run.
    pub fn load(&self) -> Result<Vec<StoredStream>, PersistError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path).map_err(|e| PersistError::Read(e.to_string()))?;
        file.lock_shared().map_err(|e| PersistError::Read(e.to_string()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| PersistError::Read(e.to_string()))?;
        FileExt::unlock(&file).map_err(|e| PersistError::Read(e.to_string()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the stream list atomically: serialize to a temp file in the
    /// same directory, flush, then rename over the real path.
    pub fn save(&self, streams: &[StoredStream]) -> Result<(), PersistError> {
        let body = serde_json::to_string_pretty(streams)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| PersistError::Write(e.to_string()))?;

        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("hls-sentinel-streams")
        ));
        {
            let mut tmp = File::create(&tmp_path).map_err(|e| PersistError::Write(e.to_string()))?;
            tmp.lock_exclusive().map_err(|e| PersistError::Write(e.to_string()))?;
            tmp.write_all(body.as_bytes())
                .map_err(|e| PersistError::Write(e.to_string()))?;
            tmp.sync_all().map_err(|e| PersistError::Write(e.to_string()))?;
            FileExt::unlock(&tmp).map_err(|e| PersistError::Write(e.to_string()))?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| PersistError::Write(e.to_string()))?;
        Ok(())
    }
}
