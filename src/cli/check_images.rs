use anyhow::Result;
use tracing::info;

use super::{connect_db, RunMode};
use crate::catalog::HttpProbe;
use crate::config::UpkeepConfig;
use crate::database_ops::image_check::{check_all, collect_urls, BrokenReport, DEFAULT_PRODUCT_LIMIT};
use crate::database_ops::products::fetch_active_products;

#[derive(Debug, Clone)]
pub struct CheckImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
    pub sample: usize,
}

/// Sample image references, probe them and extrapolate the broken share.
pub async fn run(cfg: CheckImagesConfig) -> Result<()> {
    let db = connect_db().await?;
    let limit = cfg.mode.limit.unwrap_or(DEFAULT_PRODUCT_LIMIT);
    let products: Vec<_> = fetch_active_products(&db, Some(limit))
        .await?
        .into_iter()
        .filter(|p| !p.images.is_empty())
        .collect();
    let urls = collect_urls(&products);
    let sample: Vec<String> = urls.keys().take(cfg.sample).cloned().collect();
    info!(target: "image_check", products = products.len(), urls = urls.len(), sample = sample.len(), workers = cfg.upkeep.image_check_workers, "checking images");

    let probe = HttpProbe::new(cfg.upkeep.http_timeout)?;
    let results = check_all(&probe, &sample, cfg.upkeep.image_check_workers, &cfg.upkeep.public_dir).await;
    let report = BrokenReport::build(products.len(), &urls, &sample, &results);

    super::banner("Broken image report");
    println!("Products scanned:  {}", report.products_scanned);
    println!("Unique images:     {}", report.total_urls);
    println!("Checked:           {}", report.checked);
    println!("  OK:              {}", report.ok);
    println!("  Broken:          {} ({:.1}%)", report.broken.len(), report.broken_pct());
    println!("Estimated broken:  ~{}", report.estimated_broken_total());
    println!("Products affected (sample): {}", report.affected_products);
    println!("\nError types:");
    for (error, n) in &report.error_types {
        println!("  {error}: {n}");
    }
    println!("\nExamples:");
    for b in report.broken.iter().take(10) {
        println!("  {}\n    {} (affects {} products)", b.url, b.error, b.products);
    }
    Ok(())
}
