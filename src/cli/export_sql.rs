use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::catalog::CatalogIndex;
use crate::config::UpkeepConfig;
use crate::database_ops::sql_export::{export_catalog, render_import_script, ExportStats, ExportedProduct};

#[derive(Debug, Clone)]
pub struct ExportSqlConfig {
    pub upkeep: UpkeepConfig,
    pub output: PathBuf,
    /// Optional JSON log of the exported rows.
    pub log: Option<PathBuf>,
}

#[derive(Serialize)]
struct ExportLog<'a> {
    stats: &'a ExportStats,
    imported: &'a [ExportedProduct],
}

pub async fn run(cfg: ExportSqlConfig) -> Result<()> {
    let csv = &cfg.upkeep.catalog_csv;
    if !csv.is_file() {
        bail!("catalog CSV not found: {}", csv.display());
    }
    let index = CatalogIndex::load(csv);
    if index.is_empty() {
        bail!("catalog CSV has no usable rows: {}", csv.display());
    }
    let export = export_catalog(
        index.records(),
        &cfg.upkeep.images_dir(),
        &cfg.upkeep.local_prefix,
        &cfg.upkeep.contact_phone,
    );
    let source_name = csv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let script = render_import_script(
        &export.statements,
        &export.stats,
        &source_name,
        &cfg.upkeep.contact_phone,
    );
    if let Some(parent) = cfg.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&cfg.output, script)
        .with_context(|| format!("writing {}", cfg.output.display()))?;
    info!(target: "sql_export", output = %cfg.output.display(), statements = export.statements.len(), "script written");

    if let Some(log) = &cfg.log {
        let body = serde_json::to_string_pretty(&ExportLog {
            stats: &export.stats,
            imported: &export.exported,
        })?;
        std::fs::write(log, body).with_context(|| format!("writing {}", log.display()))?;
    }

    let s = &export.stats;
    println!("Catalog rows:       {}", s.total_rows);
    println!("With local image:   {}", s.with_images);
    println!("Without image:      {}", s.without_images);
    println!("Skipped (no price): {}", s.skipped);
    println!("SQL written to {}", cfg.output.display());
    Ok(())
}
