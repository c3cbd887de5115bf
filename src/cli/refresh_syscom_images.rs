use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{clip, connect_db, syscom_client, RunMode};
use crate::config::{render_template, UpkeepConfig};
use crate::database_ops::products::{fetch_external_code_without_images, update_images, ProductRow};
use crate::database_ops::syscom::SyscomClient;

pub const DEFAULT_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct RefreshSyscomImagesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
    /// Skip the detail endpoint and use the image URL template for every row.
    pub template_only: bool,
}

struct ImageRefresh<'a> {
    product: &'a ProductRow,
    images: Vec<String>,
    source: &'static str,
}

#[derive(Default)]
struct RefreshScan<'a> {
    planned: Vec<ImageRefresh<'a>>,
    from_api: usize,
    from_template: usize,
    lookup_errors: usize,
}

/// Images for each distributor row: the detail endpoint's portada and gallery
/// when it lists any, the URL template otherwise. Lookup failures fall back
/// to the template and are counted.
async fn collect_images<'a>(
    client: Option<&SyscomClient>,
    products: &'a [ProductRow],
    template: &str,
) -> RefreshScan<'a> {
    let mut scan = RefreshScan::default();
    for (i, p) in products.iter().enumerate() {
        let Some(code) = p.external_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let mut images = Vec::new();
        if let Some(client) = client {
            if i > 0 {
                sleep(client.rate_delay()).await;
            }
            match client.product_detail(code).await {
                Ok(Some(detail)) => images = detail.image_urls(),
                Ok(None) => debug!(target: "syscom", external_code = code, "no detail; using template"),
                Err(e) => {
                    scan.lookup_errors += 1;
                    warn!(target: "syscom", external_code = code, error = %e, "detail lookup failed; using template");
                }
            }
        }
        let source = if images.is_empty() {
            images.push(render_template(template, code));
            scan.from_template += 1;
            "template"
        } else {
            scan.from_api += 1;
            "api"
        };
        scan.planned.push(ImageRefresh {
            product: p,
            images,
            source,
        });
    }
    scan
}

/// Fill the empty `images` of priced distributor rows.
pub async fn run(cfg: RefreshSyscomImagesConfig) -> Result<()> {
    let client = if cfg.template_only {
        None
    } else {
        Some(syscom_client(&cfg.upkeep)?)
    };
    let db = connect_db().await?;
    let limit = cfg.mode.limit.unwrap_or(DEFAULT_LIMIT);
    let products = fetch_external_code_without_images(&db, Some(limit)).await?;
    info!(target: "syscom", products = products.len(), template_only = cfg.template_only, mode = cfg.mode.label(), "distributor rows without images");

    let scan = collect_images(client.as_ref(), &products, &cfg.upkeep.syscom.image_url_template).await;

    super::banner("Distributor image refresh");
    println!("Rows without images: {}", products.len());
    println!("From detail API:     {}", scan.from_api);
    println!("From URL template:   {}", scan.from_template);
    println!("Lookup errors:       {}", scan.lookup_errors);
    for r in scan.planned.iter().take(5) {
        println!(
            "  {} [{}] {} image(s) ({})",
            clip(&r.product.title, 50),
            r.product.external_code.as_deref().unwrap_or_default(),
            r.images.len(),
            r.source
        );
    }

    if !cfg.mode.confirm(scan.planned.len(), "image updates")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for r in &scan.planned {
        match update_images(&db, r.product.id, &r.images).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "syscom", id = %r.product.id, error = %e, "image update failed");
            }
        }
        if updated > 0 && updated % 50 == 0 {
            info!(target: "syscom", updated, total = scan.planned.len(), "progress");
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SYSCOM_IMAGE_URL_TEMPLATE;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product(code: &str) -> ProductRow {
        ProductRow {
            external_code: Some(code.to_string()),
            price: Some(10.0),
            ..ProductRow::new(code)
        }
    }

    #[tokio::test]
    async fn detail_images_first_then_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/productos/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "producto_id": 11,
                "img_portada": "https://ftp3.syscom.mx/p/11.jpg",
                "imagenes": [{"url": "https://ftp3.syscom.mx/p/11b.jpg"}]
            })))
            .mount(&server)
            .await;

        let client = SyscomClient::against(&server.uri());
        let products = [product("11"), product("12"), ProductRow::new("sin codigo")];
        let scan = collect_images(Some(&client), &products, DEFAULT_SYSCOM_IMAGE_URL_TEMPLATE).await;
        assert_eq!(scan.planned.len(), 2);
        assert_eq!(
            scan.planned[0].images,
            vec!["https://ftp3.syscom.mx/p/11.jpg", "https://ftp3.syscom.mx/p/11b.jpg"]
        );
        assert_eq!(scan.planned[0].source, "api");
        assert_eq!(scan.planned[1].images, vec!["https://ftp3.syscom.mx/IMG/img_prod/12.jpg"]);
        assert_eq!((scan.from_api, scan.from_template, scan.lookup_errors), (1, 1, 0));
    }

    #[tokio::test]
    async fn template_only_and_failed_lookups_use_the_template() {
        let products = [product("7")];
        let scan = collect_images(None, &products, "https://img.example/{code}.jpg").await;
        assert_eq!(scan.planned[0].images, vec!["https://img.example/7.jpg"]);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = SyscomClient::against(&server.uri());
        let scan = collect_images(Some(&client), &products, "https://img.example/{code}.jpg").await;
        assert_eq!(scan.lookup_errors, 1);
        assert_eq!(scan.planned[0].source, "template");
    }
}
