use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::database_ops::sql_export::{split_sql, write_chunks};

#[derive(Debug, Clone)]
pub struct SplitSqlConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub per_chunk: usize,
    pub prefix: String,
}

pub async fn run(cfg: SplitSqlConfig) -> Result<()> {
    let content = std::fs::read_to_string(&cfg.input)
        .with_context(|| format!("reading {}", cfg.input.display()))?;
    let Some(split) = split_sql(&content, cfg.per_chunk) else {
        bail!("no INSERT statements found in {}", cfg.input.display());
    };
    info!(
        target: "sql_export",
        statements = split.statement_count(),
        chunks = split.chunks.len(),
        per_chunk = cfg.per_chunk,
        "splitting script"
    );
    let files = write_chunks(&split, &cfg.output_dir, &cfg.prefix)?;

    println!("Statements: {}", split.statement_count());
    println!("Chunks written to {}:", cfg.output_dir.display());
    for f in &files {
        if let Some(name) = f.file_name() {
            println!("  {}", name.to_string_lossy());
        }
    }
    Ok(())
}
