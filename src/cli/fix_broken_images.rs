use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{clip, connect_db, RunMode};
use crate::catalog::{CatalogIndex, HttpProbe, ImageProbe, ImageResolver, ResolvePolicy};
use crate::config::UpkeepConfig;
use crate::database_ops::image_check::{check_all, collect_urls, products_with_broken, BrokenImages};
use crate::database_ops::products::{fetch_active_products, update_images};

#[derive(Debug, Clone)]
pub struct FixBrokenImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
}

#[derive(Debug, Clone, PartialEq)]
enum Fix {
    /// Other images of the product still work; drop the broken ones.
    DropBroken(Vec<String>),
    /// Nothing left; point at a local file (or a verified vendor URL).
    Replace { image: String, source: &'static str },
}

struct PlannedFix {
    id: Uuid,
    title: String,
    broken: Vec<String>,
    fix: Fix,
}

impl PlannedFix {
    fn images(&self) -> Vec<String> {
        match &self.fix {
            Fix::DropBroken(kept) => kept.clone(),
            Fix::Replace { image, .. } => vec![image.clone()],
        }
    }
}

#[derive(Default)]
struct FixPlan {
    fixes: Vec<PlannedFix>,
    /// Products left as they are: every image broken and no replacement.
    unfixable: usize,
}

const NO_IMAGES: &[String] = &[];

async fn plan_fixes<P: ImageProbe>(
    resolver: &ImageResolver<P>,
    broken: &[BrokenImages<'_>],
    index: &CatalogIndex,
) -> FixPlan {
    let mut plan = FixPlan::default();
    for b in broken {
        let p = b.product;
        let fix = if !b.kept.is_empty() {
            Fix::DropBroken(b.kept.clone())
        } else {
            match resolver
                .resolve_text(&p.title, p.description.as_deref(), NO_IMAGES, index)
                .await
            {
                Some(res) => Fix::Replace {
                    image: res.reference,
                    source: res.source.as_str(),
                },
                None => {
                    plan.unfixable += 1;
                    continue;
                }
            }
        };
        plan.fixes.push(PlannedFix {
            id: p.id,
            title: p.title.clone(),
            broken: b.broken.clone(),
            fix,
        });
    }
    plan
}

/// Check every image of active products; drop the broken ones, or replace
/// them with a local file when nothing else is left.
pub async fn run(cfg: FixBrokenImagesConfig) -> Result<()> {
    let index = CatalogIndex::load(&cfg.upkeep.catalog_csv);
    let db = connect_db().await?;
    let products: Vec<_> = fetch_active_products(&db, cfg.mode.limit)
        .await?
        .into_iter()
        .filter(|p| !p.images.is_empty())
        .collect();
    let urls: Vec<String> = collect_urls(&products).into_keys().collect();
    info!(target: "image_check", products = products.len(), urls = urls.len(), workers = cfg.upkeep.image_check_workers, "checking every image");

    let probe = HttpProbe::new(cfg.upkeep.http_timeout)?;
    let results = check_all(&probe, &urls, cfg.upkeep.image_check_workers, &cfg.upkeep.public_dir).await;
    let broken = products_with_broken(&products, &results);
    let broken_urls: BTreeSet<&str> = broken
        .iter()
        .flat_map(|b| b.broken.iter().map(String::as_str))
        .collect();

    // replacements must answer before they are accepted
    let policy = ResolvePolicy {
        verify_remote: true,
        download: false,
    };
    let resolver = ImageResolver::new(probe, &cfg.upkeep, policy);
    let plan = plan_fixes(&resolver, &broken, &index).await;

    super::banner("Broken image repair");
    println!("Products checked:       {}", products.len());
    println!("Images checked:         {}", urls.len());
    println!("Broken images:          {}", broken_urls.len());
    println!("Products affected:      {}", broken.len());
    println!("Fixable:                {}", plan.fixes.len());
    println!("Without replacement:    {}", plan.unfixable);
    for f in plan.fixes.iter().take(10) {
        match &f.fix {
            Fix::DropBroken(kept) => println!(
                "  {} drop {} broken, keep {}",
                clip(&f.title, 60),
                f.broken.len(),
                kept.len()
            ),
            Fix::Replace { image, source } => {
                println!("  {} -> {image} ({source})", clip(&f.title, 60))
            }
        }
    }
    if !broken_urls.is_empty() {
        println!("\nBroken URLs:");
        for url in broken_urls.iter().take(50) {
            println!("  {url}");
        }
    }

    if !cfg.mode.confirm(plan.fixes.len(), "image repairs")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for f in &plan.fixes {
        match update_images(&db, f.id, &f.images()).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "image_check", id = %f.id, error = %e, "image update failed");
            }
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProbeOutcome;
    use crate::database_ops::products::ProductRow;
    use std::collections::HashMap;
    use std::path::Path;

    /// Only URLs containing "good" answer.
    struct OnlyGood;

    #[async_trait::async_trait]
    impl ImageProbe for OnlyGood {
        async fn check(&self, url: &str) -> ProbeOutcome {
            if url.contains("good") {
                ProbeOutcome::Ok
            } else {
                ProbeOutcome::Status(404)
            }
        }

        async fn download(&self, _url: &str, _dest: &Path) -> ProbeOutcome {
            ProbeOutcome::Status(404)
        }
    }

    fn product(title: &str, images: &[&str]) -> ProductRow {
        ProductRow {
            images: images.iter().map(|s| s.to_string()).collect(),
            ..ProductRow::new(title)
        }
    }

    #[tokio::test]
    async fn broken_images_are_dropped_or_replaced_locally() {
        let dir = tempfile::tempdir().unwrap();
        let upkeep = UpkeepConfig {
            public_dir: dir.path().to_path_buf(),
            ..UpkeepConfig::default()
        };
        std::fs::create_dir_all(upkeep.images_dir()).unwrap();
        std::fs::write(upkeep.images_dir().join("PET-15X.jpg"), b"x").unwrap();
        let index = CatalogIndex::from_csv_text("Lista\nCódigo,Clave,Descripción\n100048,PET-15X,Pala\n");

        let products = [
            product("Martillo", &["https://cdn.x/good.jpg", "https://cdn.x/dead.jpg"]),
            product("PET-15X - Pala cuadrada", &["https://cdn.x/dead.jpg"]),
            product("Sin codigo", &["https://cdn.x/dead2.jpg"]),
        ];
        let urls: Vec<String> = collect_urls(&products).into_keys().collect();
        let results: HashMap<_, _> = check_all(&OnlyGood, &urls, 2, dir.path()).await;
        let broken = products_with_broken(&products, &results);
        assert_eq!(broken.len(), 3);

        let policy = ResolvePolicy { verify_remote: true, download: false };
        let resolver = ImageResolver::new(OnlyGood, &upkeep, policy);
        let plan = plan_fixes(&resolver, &broken, &index).await;

        assert_eq!(plan.unfixable, 1);
        assert_eq!(plan.fixes.len(), 2);
        assert_eq!(plan.fixes[0].images(), vec!["https://cdn.x/good.jpg"]);
        assert_eq!(
            plan.fixes[1].fix,
            Fix::Replace {
                image: "/images/marketplace/truper/PET-15X.jpg".to_string(),
                source: "local",
            }
        );
    }
}
