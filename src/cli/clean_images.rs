use anyhow::Result;
use itertools::Itertools;
use tracing::warn;

use super::{clip, connect_db, RunMode};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_active_products, update_images};
use crate::normalization::images::{
    clean_product_images, is_wrong_image_url, mismatched_codes, shared_images, DuplicateReport,
};

#[derive(Debug, Clone)]
pub struct CleanImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
}

#[derive(Debug, Default)]
struct CleanStats {
    with_images: usize,
    needing_cleanup: usize,
    images_removed: usize,
    wrong_removed: usize,
    duplicates_removed: usize,
    mismatched: usize,
}

/// Duplicate and wrong-image analysis; `--execute` writes the cleaned arrays.
pub async fn run(cfg: CleanImagesConfig) -> Result<()> {
    let db = connect_db().await?;
    let products = fetch_active_products(&db, cfg.mode.limit).await?;

    let mut stats = CleanStats::default();
    let mut plan = Vec::new();
    let mut mismatch_examples = Vec::new();
    for p in &products {
        if p.images.is_empty() {
            continue;
        }
        stats.with_images += 1;

        let mismatches = mismatched_codes(&p.title, p.description.as_deref(), &p.images);
        if !mismatches.is_empty() {
            stats.mismatched += 1;
            if mismatch_examples.len() < 10 {
                mismatch_examples.push((p.title.clone(), mismatches));
            }
        }

        let cleaned = clean_product_images(
            &p.images,
            &p.title,
            p.description.as_deref(),
            &cfg.upkeep.image_url_template,
        );
        if cleaned == p.images {
            continue;
        }
        let report = DuplicateReport::analyze(&p.images);
        stats.needing_cleanup += 1;
        stats.images_removed += p.images.len().saturating_sub(cleaned.len());
        stats.wrong_removed += p.images.iter().filter(|i| is_wrong_image_url(i)).count();
        stats.duplicates_removed += report.removed();
        plan.push((p, cleaned));
    }

    let shared = shared_images(products.iter().map(|p| p.images.as_slice()));

    super::banner("Image cleanup");
    println!("Active products:          {}", products.len());
    println!("With images:              {}", stats.with_images);
    println!("Needing cleanup:          {}", stats.needing_cleanup);
    println!("Images removed:           {}", stats.images_removed);
    println!("Wrong URLs removed:       {}", stats.wrong_removed);
    println!("Duplicates removed:       {}", stats.duplicates_removed);
    println!("Code/image mismatches:    {}", stats.mismatched);
    println!("Images shared by several: {}", shared.len());

    for (img, n) in shared.iter().sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0))).take(10) {
        println!("  {n:>4} products  {img}");
    }
    for (title, mismatches) in &mismatch_examples {
        println!("  {}", clip(title, 60));
        for m in mismatches {
            println!("      {}", m.describe());
        }
    }
    for (p, cleaned) in plan.iter().take(10) {
        println!("\n  {}", clip(&p.title, 60));
        println!("    before: {:?}", p.images);
        println!("    after:  {cleaned:?}");
    }

    if !cfg.mode.confirm(plan.len(), "image cleanups")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for (p, cleaned) in &plan {
        match update_images(&db, p.id, cleaned).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "images", id = %p.id, error = %e, "cleanup failed");
            }
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}
