use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{clip, connect_db, RunMode};
use crate::database_ops::price_sheet::{plan_sheet_updates, PriceSheet};
use crate::database_ops::products::{fetch_with_sku, update_price_keep_original};

#[derive(Debug, Clone)]
pub struct UpdatePricesCsvConfig {
    pub file: PathBuf,
    pub mode: RunMode,
}

/// Set prices from a SKU price sheet.
pub async fn run(cfg: UpdatePricesCsvConfig) -> Result<()> {
    let mut sheet = PriceSheet::load(&cfg.file)?;
    if let Some(limit) = cfg.mode.limit {
        sheet.rows.truncate(limit);
    }
    if sheet.rows.is_empty() {
        println!("No usable rows in {}", cfg.file.display());
        return Ok(());
    }
    let db = connect_db().await?;
    let products = fetch_with_sku(&db).await?;
    let plan = plan_sheet_updates(&sheet, &products);
    info!(target: "prices", rows = sheet.rows.len(), products = products.len(), updates = plan.updates.len(), mode = cfg.mode.label(), "price sheet matched");

    super::banner("Price sheet update");
    println!("Sheet rows:        {}", sheet.rows.len());
    println!("Rejected rows:     {}", sheet.rejected);
    println!("To update:         {}", plan.updates.len());
    println!("Unchanged:         {}", plan.unchanged);
    println!("SKU not found:     {}", plan.not_found.len());
    for u in plan.updates.iter().take(10) {
        let current = u.current.map_or("-".to_string(), |c| format!("{c:.2}"));
        match u.original_price {
            Some(o) => println!("  {} [{}] {current} -> {:.2} (list {o:.2})", clip(&u.title, 50), u.sku, u.price),
            None => println!("  {} [{}] {current} -> {:.2}", clip(&u.title, 50), u.sku, u.price),
        }
    }
    for sku in plan.not_found.iter().take(10) {
        println!("  not found: {sku}");
    }

    if !cfg.mode.confirm(plan.updates.len(), "price updates")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for u in &plan.updates {
        match update_price_keep_original(&db, u.id, u.price, u.original_price).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "prices", id = %u.id, sku = %u.sku, error = %e, "price update failed");
            }
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}
