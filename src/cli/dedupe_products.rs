use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{clip, connect_db, RunMode};
use crate::database_ops::dedupe::{group_duplicates, plan_removals, DuplicateKey, Removal, DELETED_STATUS};
use crate::database_ops::products::{fetch_with_external_code, fetch_with_sku, set_status};

#[derive(Debug, Clone, Default)]
pub struct DedupeProductsConfig {
    pub mode: RunMode,
    pub by_sku: bool,
    pub by_external_code: bool,
}

/// Soft-delete duplicate products, keeping the best row of each group.
pub async fn run(cfg: DedupeProductsConfig) -> Result<()> {
    // neither flag means both
    let (by_sku, by_code) = if cfg.by_sku || cfg.by_external_code {
        (cfg.by_sku, cfg.by_external_code)
    } else {
        (true, true)
    };
    let db = connect_db().await?;

    let mut plan: Vec<Removal> = Vec::new();
    let mut planned: HashSet<Uuid> = HashSet::new();
    let mut keys = Vec::new();
    if by_sku {
        keys.push(DuplicateKey::Sku);
    }
    if by_code {
        keys.push(DuplicateKey::ExternalCode);
    }
    for key in keys {
        let rows = match key {
            DuplicateKey::Sku => fetch_with_sku(&db).await?,
            DuplicateKey::ExternalCode => fetch_with_external_code(&db).await?,
        };
        let rows: Vec<_> = rows.into_iter().filter(|r| !planned.contains(&r.id)).collect();
        let groups = group_duplicates(&rows, key);
        let removals = plan_removals(&groups);
        info!(target: "dedupe", key = key.as_str(), rows = rows.len(), groups = groups.len(), removals = removals.len(), "duplicates grouped");
        println!("By {}: {} groups, {} rows to remove", key.as_str(), groups.len(), removals.len());
        for r in removals {
            if planned.insert(r.id) {
                plan.push(r);
            }
        }
    }

    for r in plan.iter().take(10) {
        println!("  [{}] remove {} ({})", r.key, clip(&r.title, 50), r.id);
        println!("        keep   {} ({})", clip(&r.keep_title, 50), r.keep_id);
    }
    if let Some(limit) = cfg.mode.limit {
        plan.truncate(limit);
    }

    if !cfg.mode.confirm(plan.len(), "soft deletes")? {
        return Ok(());
    }
    let (mut removed, mut errors) = (0usize, 0usize);
    for r in &plan {
        match set_status(&db, r.id, DELETED_STATUS).await {
            Ok(()) => removed += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "dedupe", id = %r.id, error = %e, "soft delete failed");
            }
        }
    }
    println!("Removed: {removed}  Errors: {errors}");
    Ok(())
}
