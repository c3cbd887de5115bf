use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::{clip, connect_db, RunMode};
use crate::catalog::{CatalogIndex, HttpProbe, ImageProbe, ImageResolver, ResolvePolicy};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_active_products, update_images, ProductRow};

#[derive(Debug, Clone)]
pub struct ResolveImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
    pub policy: ResolvePolicy,
}

struct PlannedUpdate {
    id: Uuid,
    title: String,
    image: String,
    source: &'static str,
}

#[derive(Default)]
struct ResolutionPlan {
    lacking: usize,
    updates: Vec<PlannedUpdate>,
    unresolved: usize,
    by_source: BTreeMap<&'static str, usize>,
}

const NO_IMAGES: &[String] = &[];

/// Select products whose assigned images cannot be served (probing with at
/// most `workers` in flight) and resolve a replacement for each.
async fn plan_resolutions<P: ImageProbe>(
    resolver: &ImageResolver<P>,
    products: &[ProductRow],
    index: &CatalogIndex,
    workers: usize,
) -> ResolutionPlan {
    let usable: Vec<bool> = stream::iter(products)
        .map(|p| async move { resolver.usable_existing(&p.images).await.is_some() })
        .buffered(workers.max(1))
        .collect()
        .await;

    let mut plan = ResolutionPlan::default();
    for (p, _) in products.iter().zip(usable).filter(|(_, ok)| !ok) {
        plan.lacking += 1;
        // assigned images were just rejected, don't probe them again
        match resolver
            .resolve_text(&p.title, p.description.as_deref(), NO_IMAGES, index)
            .await
        {
            Some(res) => {
                *plan.by_source.entry(res.source.as_str()).or_default() += 1;
                plan.updates.push(PlannedUpdate {
                    id: p.id,
                    title: p.title.clone(),
                    image: res.reference,
                    source: res.source.as_str(),
                });
            }
            None => plan.unresolved += 1,
        }
    }
    plan
}

/// Assign an image to every active product that has none that can be served.
pub async fn run(cfg: ResolveImagesConfig) -> Result<()> {
    let index = CatalogIndex::load(&cfg.upkeep.catalog_csv);
    let db = connect_db().await?;
    let products = fetch_active_products(&db, cfg.mode.limit).await?;
    let probe = HttpProbe::new(cfg.upkeep.http_timeout)?;
    let resolver = ImageResolver::new(probe, &cfg.upkeep, cfg.policy);

    info!(target: "resolver", products = products.len(), verify = cfg.policy.verify_remote, mode = cfg.mode.label(), "resolving images");
    let ResolutionPlan {
        lacking,
        updates: plan,
        unresolved,
        by_source,
    } = plan_resolutions(&resolver, &products, &index, cfg.upkeep.image_check_workers).await;
    info!(target: "resolver", lacking, resolved = plan.len(), unresolved, "resolution planned");

    super::banner("Image resolution");
    println!("Active products:        {}", products.len());
    println!("Without a usable image: {lacking}");
    println!("Resolved:               {}", plan.len());
    for (source, n) in &by_source {
        println!("  {source:<10} {n}");
    }
    println!("Unresolved:             {unresolved}");
    for u in plan.iter().take(10) {
        println!("  {} -> {} ({})", clip(&u.title, 60), u.image, u.source);
    }

    if !cfg.mode.confirm(plan.len(), "image updates")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for u in &plan {
        match update_images(&db, u.id, std::slice::from_ref(&u.image)).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "resolver", id = %u.id, error = %e, "image update failed");
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
    use std::path::Path;

    /// Every URL answers 404.
    struct DeadLinks;

    #[async_trait::async_trait]
    impl ImageProbe for DeadLinks {
        async fn check(&self, _url: &str) -> ProbeOutcome {
            ProbeOutcome::Status(404)
        }

        async fn download(&self, _url: &str, _dest: &Path) -> ProbeOutcome {
            ProbeOutcome::Status(404)
        }
    }

    const CSV: &str = "Lista\nCódigo,Clave,Descripción\n100048,RMAX-7NX,Rotomartillo SDS Max\n";
    const DEAD: &str = "https://www.truper.com/media/import/imagenes/DEAD-404.jpg";

    fn setup() -> (tempfile::TempDir, UpkeepConfig, Vec<ProductRow>) {
        let dir = tempfile::tempdir().unwrap();
        let upkeep = UpkeepConfig {
            public_dir: dir.path().to_path_buf(),
            ..UpkeepConfig::default()
        };
        std::fs::create_dir_all(upkeep.images_dir()).unwrap();
        std::fs::write(upkeep.images_dir().join("RMAX-7NX.jpg"), b"x").unwrap();
        let dead = ProductRow {
            images: vec![DEAD.to_string()],
            ..ProductRow::new("RMAX-7NX - Rotomartillo SDS Max 6kg")
        };
        let bare = ProductRow::new("Rotomartillo RMAX-7NX");
        (dir, upkeep, vec![dead, bare])
    }

    #[tokio::test]
    async fn dead_remote_image_is_replaced_when_verifying() {
        let (_dir, upkeep, products) = setup();
        let index = CatalogIndex::from_csv_text(CSV);
        let policy = ResolvePolicy { verify_remote: true, download: false };
        let resolver = ImageResolver::new(DeadLinks, &upkeep, policy);

        let plan = plan_resolutions(&resolver, &products, &index, 4).await;
        assert_eq!(plan.lacking, 2);
        assert_eq!(plan.unresolved, 0);
        assert_eq!(plan.updates[0].id, products[0].id);
        assert_eq!(plan.updates[0].image, "/images/marketplace/truper/RMAX-7NX.jpg");
        assert_eq!(plan.updates[0].source, "local");
        assert_eq!(plan.by_source.get("local"), Some(&2));
    }

    #[tokio::test]
    async fn trusted_vendor_urls_are_left_alone_by_default() {
        let (_dir, upkeep, products) = setup();
        let index = CatalogIndex::from_csv_text(CSV);
        let resolver = ImageResolver::new(DeadLinks, &upkeep, ResolvePolicy::default());

        let plan = plan_resolutions(&resolver, &products, &index, 4).await;
        assert_eq!(plan.lacking, 1);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, products[1].id);
    }
}
