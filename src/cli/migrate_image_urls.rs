use anyhow::Result;
use tracing::{info, warn};

use super::{clip, connect_db, RunMode};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_active_products, update_images};
use crate::normalization::images::local_to_remote;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct MigrateImageUrlsConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
    pub batch_size: usize,
}

/// Re-point local vendor image paths to the vendor's remote URLs.
pub async fn run(cfg: MigrateImageUrlsConfig) -> Result<()> {
    let db = connect_db().await?;
    let products = fetch_active_products(&db, cfg.mode.limit).await?;
    let plan: Vec<_> = products
        .iter()
        .filter_map(|p| {
            local_to_remote(&p.images, &cfg.upkeep.local_prefix, &cfg.upkeep.image_url_template)
                .map(|new| (p, new))
        })
        .collect();

    super::banner("Local -> remote image URLs");
    println!("Active products:   {}", products.len());
    println!("To migrate:        {}", plan.len());
    for (p, new) in plan.iter().take(10) {
        println!("  {}\n    {:?}\n    -> {:?}", clip(&p.title, 60), p.images, new);
    }

    if !cfg.mode.confirm(plan.len(), "URL migrations")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for (i, batch) in plan.chunks(cfg.batch_size.max(1)).enumerate() {
        for (p, new) in batch {
            match update_images(&db, p.id, new).await {
                Ok(()) => updated += 1,
                Err(e) => {
                    errors += 1;
                    warn!(target: "images", id = %p.id, error = %e, "migration failed");
                }
            }
        }
        info!(target: "images", batch = i + 1, updated, errors, "batch applied");
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}
