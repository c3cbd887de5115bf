use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

use super::{connect_db, syscom_client, RunMode};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{
    category_id_by_slug, existing_codes_and_skus, insert_with_retry, NewProduct,
};
use crate::database_ops::syscom::mapping::TARGET_CATEGORY_SLUG;
use crate::database_ops::syscom::{map_to_new_product, SyscomClient, SyscomProduct, DEFAULT_CATEGORIES};

pub const INSERT_BATCH: usize = 50;

#[derive(Debug, Clone)]
pub struct ImportSyscomConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
    /// Single distributor category id; all default categories when unset.
    pub category: Option<String>,
    pub start_page: u32,
}

#[derive(Debug, Default)]
struct ImportStats {
    fetched: usize,
    failed_categories: usize,
    duplicates: usize,
    unmapped: usize,
    planned: usize,
}

/// Known external codes and SKUs, grown as rows are planned so a run never
/// inserts the same item twice.
struct SeenKeys {
    codes: HashSet<String>,
    skus: HashSet<String>,
}

impl SeenKeys {
    fn admit(&mut self, product: &SyscomProduct) -> bool {
        let code = product.producto_id.clone();
        let sku = product.sku_key();
        if code.as_ref().is_some_and(|c| self.codes.contains(c))
            || sku.as_ref().is_some_and(|s| self.skus.contains(s))
        {
            return false;
        }
        self.codes.extend(code);
        self.skus.extend(sku);
        true
    }
}

#[derive(Debug, Default)]
struct CategoryFetch {
    products: Vec<SyscomProduct>,
    /// Category ids whose listing could not be fetched.
    failed: Vec<String>,
}

/// Fetch every category in order; one that fails is logged and the rest are
/// still fetched.
async fn fetch_categories(
    client: &SyscomClient,
    categories: &[(String, String)],
    start_page: u32,
) -> CategoryFetch {
    let mut out = CategoryFetch::default();
    for (id, name) in categories {
        match client.category_products(id, start_page).await {
            Ok(products) => {
                info!(target: "import", categoria = %id, name = %name, products = products.len(), "category fetched");
                out.products.extend(products);
            }
            Err(e) => {
                warn!(target: "import", categoria = %id, name = %name, error = %e, "category fetch failed");
                out.failed.push(id.clone());
            }
        }
    }
    out
}

/// Import distributor products that are not in the marketplace yet.
pub async fn run(cfg: ImportSyscomConfig) -> Result<()> {
    let client = syscom_client(&cfg.upkeep)?;
    let db = connect_db().await?;
    let category_id = category_id_by_slug(&db, TARGET_CATEGORY_SLUG).await?;
    if category_id.is_none() {
        warn!(target: "import", slug = TARGET_CATEGORY_SLUG, "target category missing; rows will have no category");
    }
    let (codes, skus) = existing_codes_and_skus(&db).await?;
    info!(target: "import", codes = codes.len(), skus = skus.len(), mode = cfg.mode.label(), "existing keys loaded");
    let mut seen = SeenKeys { codes, skus };

    let categories: Vec<(String, String)> = match &cfg.category {
        Some(id) => vec![(id.clone(), format!("categoria {id}"))],
        None => DEFAULT_CATEGORIES
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect(),
    };

    let fetched = fetch_categories(&client, &categories, cfg.start_page).await;
    let mut stats = ImportStats {
        fetched: fetched.products.len(),
        failed_categories: fetched.failed.len(),
        ..ImportStats::default()
    };
    let mut plan: Vec<NewProduct> = Vec::new();
    for p in &fetched.products {
        if cfg.mode.limit.is_some_and(|l| plan.len() >= l) {
            break;
        }
        if !seen.admit(p) {
            stats.duplicates += 1;
            continue;
        }
        match map_to_new_product(p, category_id, &cfg.upkeep.contact_phone) {
            Some(row) => plan.push(row),
            None => stats.unmapped += 1,
        }
    }
    stats.planned = plan.len();

    super::banner("Distributor import");
    println!("Fetched:           {}", stats.fetched);
    if stats.failed_categories > 0 {
        println!("Failed categories: {} ({})", stats.failed_categories, fetched.failed.join(", "));
    }
    println!("Already present:   {}", stats.duplicates);
    println!("Without price/title: {}", stats.unmapped);
    println!("To insert:         {}", stats.planned);
    for row in plan.iter().take(10) {
        println!("  {} | {:.2} | sku {:?}", super::clip(&row.title, 60), row.price, row.sku);
    }

    if !cfg.mode.confirm(plan.len(), "inserts")? {
        return Ok(());
    }
    let (mut inserted, mut errors) = (0usize, 0usize);
    for batch in plan.chunks(INSERT_BATCH) {
        let outcome = insert_with_retry(&db, batch).await;
        inserted += outcome.inserted;
        errors += outcome.errors;
        info!(target: "import", inserted, errors, "batch done");
    }
    println!("Inserted: {inserted}  Errors: {errors}");
    Ok(())
}
