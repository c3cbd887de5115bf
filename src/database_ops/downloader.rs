//! Bulk download of vendor images for every catalog record.
//!
//! Each record is checked against the local folder first (clave or código,
//! `.jpg` or `.webp`); otherwise the vendor URL built from the código is
//! fetched and stored as `{key}.jpg`. Progress goes to a resumable JSON log.
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::progress::{Outcome, ProgressEntry, ProgressLog};
use crate::catalog::{CatalogRecord, ImageProbe, ProbeOutcome};
use crate::config::render_template;

/// Completions between progress log saves.
pub const SAVE_EVERY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub codigo: String,
    pub clave: String,
    /// File stem used for the stored image: clave when present, else código.
    pub key: String,
}

impl DownloadJob {
    pub fn from_record(record: &CatalogRecord) -> Self {
        Self {
            codigo: record.codigo.clone(),
            clave: record.clave_key().unwrap_or_default(),
            key: record.image_key(),
        }
    }

    fn entry(&self) -> ProgressEntry {
        ProgressEntry {
            codigo: self.codigo.clone(),
            clave: self.clave.clone(),
            ..Default::default()
        }
    }
}

/// Records not yet downloaded or skipped, in catalog order.
pub fn pending_jobs(
    records: &[CatalogRecord],
    processed: &HashSet<String>,
    limit: Option<usize>,
) -> Vec<DownloadJob> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| !r.codigo.is_empty() && !processed.contains(&r.codigo))
        .filter(|r| seen.insert(r.codigo.clone()))
        .take(limit.unwrap_or(usize::MAX))
        .map(DownloadJob::from_record)
        .collect()
}

/// First existing file among `{key}.jpg`, `{codigo}.jpg`, `{key}.webp`, `{codigo}.webp`.
pub fn existing_variation(images_dir: &Path, key: &str, codigo: &str) -> Option<String> {
    [
        format!("{key}.jpg"),
        format!("{codigo}.jpg"),
        format!("{key}.webp"),
        format!("{codigo}.webp"),
    ]
    .into_iter()
    .find(|name| images_dir.join(name).is_file())
}

pub struct Downloader<'a, P> {
    probe: &'a P,
    images_dir: PathBuf,
    url_template: String,
    workers: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub interrupted: bool,
}

impl<'a, P: ImageProbe> Downloader<'a, P> {
    pub fn new(probe: &'a P, images_dir: PathBuf, url_template: &str, workers: usize) -> Self {
        Self {
            probe,
            images_dir,
            url_template: url_template.to_string(),
            workers: workers.max(1),
        }
    }

    pub async fn process(&self, job: &DownloadJob) -> Outcome {
        if let Some(name) = existing_variation(&self.images_dir, &job.key, &job.codigo) {
            return Outcome::AlreadyExists(ProgressEntry {
                filename: Some(name),
                ..job.entry()
            });
        }
        let url = render_template(&self.url_template, &job.codigo);
        let filename = format!("{}.jpg", job.key);
        match self.probe.download(&url, &self.images_dir.join(&filename)).await {
            ProbeOutcome::Ok => Outcome::Downloaded(ProgressEntry {
                filename: Some(filename),
                url: Some(url),
                ..job.entry()
            }),
            ProbeOutcome::Status(_) | ProbeOutcome::NotImage(_) => Outcome::NotFound(job.entry()),
            other => Outcome::Failed(ProgressEntry {
                url: Some(url),
                error: Some(other.label()),
                ..job.entry()
            }),
        }
    }

    /// Work through `jobs` with a bounded pool, recording into `log`.
    ///
    /// The log is saved every [`SAVE_EVERY`] completions and at the end. On
    /// Ctrl-C in-flight downloads are dropped, the log is saved and the run
    /// stops early.
    pub async fn run(&self, jobs: Vec<DownloadJob>, log: &mut ProgressLog) -> Result<RunSummary> {
        std::fs::create_dir_all(&self.images_dir)?;
        let total = jobs.len();
        let mut results = stream::iter(jobs.iter())
            .map(|job| self.process(job))
            .buffer_unordered(self.workers);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut summary = RunSummary::default();
        loop {
            tokio::select! {
                next = results.next() => {
                    let Some(outcome) = next else { break };
                    log.record(outcome);
                    summary.processed += 1;
                    if summary.processed % SAVE_EVERY == 0 {
                        log.save()?;
                        info!(
                            target: "downloader",
                            processed = summary.processed,
                            total,
                            downloaded = log.stats.downloaded,
                            already_exists = log.stats.already_exists,
                            not_found = log.stats.not_found,
                            "progress"
                        );
                    }
                }
                _ = &mut ctrl_c => {
                    warn!(target: "downloader", processed = summary.processed, "interrupted; saving progress");
                    summary.interrupted = true;
                    break;
                }
            }
        }
        log.save()?;
        Ok(summary)
    }
}
