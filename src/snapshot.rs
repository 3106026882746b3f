//! Snapshot files: one JSON file per theater per run, a combined file keyed by
//! theater key, and a summary report. Names carry a `YYYYMMDD_HHMMSS` stamp so
//! they sort chronologically.

use crate::model::TheaterSnapshot;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const COMBINED_PREFIX: &str = "all_theaters";
pub const SUMMARY_PREFIX: &str = "summary_report";

/// A combined snapshot as read back from disk. Failed theaters are `None`.
pub type CombinedSnapshot = BTreeMap<String, Option<TheaterSnapshot>>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid snapshot JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Timestamp part of snapshot file names.
pub fn file_stamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Writes snapshot files into one output directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `dir`, created if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{key}_{stamp}.json`
    pub fn write_theater(
        &self,
        key: &str,
        snapshot: &TheaterSnapshot,
        at: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        self.write_json(key, snapshot, at)
    }

    /// `all_theaters_{stamp}.json`
    pub fn write_combined<T: Serialize>(
        &self,
        combined: &T,
        at: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        self.write_json(COMBINED_PREFIX, combined, at)
    }

    /// `summary_report_{stamp}.json`
    pub fn write_summary<T: Serialize>(
        &self,
        summary: &T,
        at: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        self.write_json(SUMMARY_PREFIX, summary, at)
    }

    fn write_json<T: Serialize>(
        &self,
        prefix: &str,
        value: &T,
        at: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.dir.join(format!("{}_{}.json", prefix, file_stamp(at)));
        let json = serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Json {
            path: path.clone(),
            source,
        })?;
        // Snapshots are immutable: never replace a file with the same stamp.
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut file| file.write_all(json.as_bytes()))
            .map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "wrote snapshot");
        Ok(path)
    }
}

/// The newest `all_theaters_*.json` in `dir`, or `None` if there is none.
pub fn latest_combined_snapshot(dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SnapshotError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let prefix = format!("{}_", COMBINED_PREFIX);
    let latest = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            (name.starts_with(&prefix) && name.ends_with(".json")).then_some(name)
        })
        .max();
    Ok(latest.map(|name| dir.join(name)))
}

pub fn load_combined(path: &Path) -> Result<CombinedSnapshot, SnapshotError> {
    let text = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}
