use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{clip, connect_db, RunMode};
use crate::catalog::local_match::LocalImageSet;
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_active_products, update_images};
use crate::normalization::images::valid_images;

#[derive(Debug, Clone)]
pub struct AssignLocalImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
}

/// Point products without a usable image at a file already in the local
/// vendor folder.
pub async fn run(cfg: AssignLocalImagesConfig) -> Result<()> {
    let images = LocalImageSet::scan(&cfg.upkeep.images_dir(), &cfg.upkeep.local_prefix);
    if images.is_empty() {
        println!("No local images under {}", cfg.upkeep.images_dir().display());
        return Ok(());
    }
    let db = connect_db().await?;
    let products = fetch_active_products(&db, cfg.mode.limit).await?;

    let mut plan = Vec::new();
    let mut strategies: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut lacking = 0usize;
    for p in &products {
        if !valid_images(&p.images, &cfg.upkeep.public_dir).is_empty() {
            continue;
        }
        lacking += 1;
        if let Some(m) = images.best_match(&p.title, p.description.as_deref()) {
            *strategies.entry(m.strategy.as_str()).or_default() += 1;
            plan.push((p, m));
        }
    }
    info!(target: "local_match", local_images = images.len(), lacking, matched = plan.len(), "local matching done");

    super::banner("Local image assignment");
    println!("Local images:           {}", images.len());
    println!("Without a usable image: {lacking}");
    println!("Matched:                {}", plan.len());
    for (s, n) in &strategies {
        println!("  {s:<13} {n}");
    }
    for (p, m) in plan.iter().take(10) {
        println!("  {} -> {} ({})", clip(&p.title, 60), m.site_path, m.strategy.as_str());
    }

    if !cfg.mode.confirm(plan.len(), "image assignments")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for (p, m) in &plan {
        match update_images(&db, p.id, std::slice::from_ref(&m.site_path)).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "local_match", id = %p.id, error = %e, "image update failed");
            }
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}
