//! Resumable progress log for the bulk image downloader.
//!
//! Shape on disk: `{"downloaded": [...], "skipped": [...], "failed": [...], "stats": {...}}`.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub codigo: String,
    #[serde(default)]
    pub clave: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default)]
    pub already_exists: u64,
    #[serde(default)]
    pub not_found: u64,
    #[serde(default)]
    pub errors: u64,
}

/// What happened to one catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded(ProgressEntry),
    AlreadyExists(ProgressEntry),
    NotFound(ProgressEntry),
    Failed(ProgressEntry),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogFile {
    #[serde(default)]
    downloaded: Vec<ProgressEntry>,
    #[serde(default)]
    skipped: Vec<ProgressEntry>,
    #[serde(default)]
    failed: Vec<ProgressEntry>,
    #[serde(default)]
    stats: ProgressStats,
}

#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    pub downloaded: Vec<ProgressEntry>,
    pub skipped: Vec<ProgressEntry>,
    pub failed: Vec<ProgressEntry>,
    pub stats: ProgressStats,
}

impl ProgressLog {
    /// Missing or unreadable logs start empty.
    pub fn load(path: &Path) -> Self {
        let file = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str::<LogFile>(&text).unwrap_or_else(|e| {
                warn!(target: "downloader", path = %path.display(), error = %e, "progress log unreadable; starting fresh");
                LogFile::default()
            }),
            Err(_) => LogFile::default(),
        };
        Self {
            path: path.to_path_buf(),
            downloaded: file.downloaded,
            skipped: file.skipped,
            failed: file.failed,
            stats: file.stats,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Codes that need no further work. Failed codes are retried.
    pub fn processed_keys(&self) -> HashSet<String> {
        self.downloaded
            .iter()
            .chain(self.skipped.iter())
            .map(|e| e.codigo.clone())
            .collect()
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.stats.total_processed += 1;
        match outcome {
            Outcome::Downloaded(e) => {
                self.stats.downloaded += 1;
                self.failed.retain(|f| f.codigo != e.codigo);
                self.downloaded.push(e);
            }
            Outcome::AlreadyExists(e) => {
                self.stats.already_exists += 1;
                self.failed.retain(|f| f.codigo != e.codigo);
                self.skipped.push(e);
            }
            Outcome::NotFound(e) => {
                self.stats.not_found += 1;
                self.failed.retain(|f| f.codigo != e.codigo);
                self.skipped.push(e);
            }
            Outcome::Failed(e) => {
                self.stats.errors += 1;
                self.failed.retain(|f| f.codigo != e.codigo);
                self.failed.push(e);
            }
        }
    }

    /// Write to a sibling temp file, then rename over the log.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&LogFile {
            downloaded: self.downloaded.clone(),
            skipped: self.skipped.clone(),
            failed: self.failed.clone(),
            stats: self.stats,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
