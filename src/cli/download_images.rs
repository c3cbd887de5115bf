use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::catalog::{CatalogIndex, HttpProbe};
use crate::config::UpkeepConfig;
use crate::database_ops::downloader::{pending_jobs, Downloader};
use crate::database_ops::progress::ProgressLog;

pub const DEFAULT_LOG: &str = "data/truper_download_log.json";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DownloadImagesConfig {
    pub upkeep: UpkeepConfig,
    pub limit: Option<usize>,
    pub log: PathBuf,
}

pub async fn run(cfg: DownloadImagesConfig) -> Result<()> {
    let csv = &cfg.upkeep.catalog_csv;
    if !csv.is_file() {
        bail!("catalog CSV not found: {}", csv.display());
    }
    let index = CatalogIndex::load(csv);
    let mut log = ProgressLog::load(&cfg.log);
    let jobs = pending_jobs(index.records(), &log.processed_keys(), cfg.limit);
    info!(
        target: "downloader",
        catalog = index.len(),
        pending = jobs.len(),
        workers = cfg.upkeep.download_workers,
        log = %cfg.log.display(),
        "starting downloads"
    );

    let probe = HttpProbe::new(DOWNLOAD_TIMEOUT)?;
    let images_dir = cfg.upkeep.images_dir();
    let downloader = Downloader::new(
        &probe,
        images_dir.clone(),
        &cfg.upkeep.image_url_template,
        cfg.upkeep.download_workers,
    );
    let summary = downloader.run(jobs, &mut log).await?;

    let s = &log.stats;
    println!("Processed this run: {}", summary.processed);
    println!("Downloaded:         {}", s.downloaded);
    println!("Already present:    {}", s.already_exists);
    println!("Not found:          {}", s.not_found);
    println!("Errors:             {}", s.errors);
    println!("Images dir:         {}", images_dir.display());
    println!("Progress log:       {}", log.path().display());
    if summary.interrupted {
        println!("Interrupted; re-run to resume.");
    }
    Ok(())
}
