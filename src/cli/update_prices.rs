use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{clip, connect_db, syscom_client, RunMode};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_zero_price_with_external_code, update_price, ProductRow};
use crate::database_ops::syscom::SyscomClient;
use crate::normalization::price::PriceQuote;

pub const DEFAULT_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct UpdatePricesConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
}

#[derive(Default)]
struct QuoteScan<'a> {
    found: Vec<(&'a ProductRow, PriceQuote)>,
    no_price: usize,
    errors: usize,
}

/// Look up each product's distributor price. A failed lookup (token or
/// transport) is logged and counted and never stops the scan.
async fn collect_quotes<'a>(client: &SyscomClient, products: &'a [ProductRow]) -> QuoteScan<'a> {
    let mut scan = QuoteScan::default();
    for (i, p) in products.iter().enumerate() {
        let Some(code) = p.external_code.as_deref() else {
            continue;
        };
        if i > 0 {
            sleep(client.rate_delay()).await;
        }
        let detail = match client.product_detail(code).await {
            Ok(d) => d,
            Err(e) => {
                scan.errors += 1;
                warn!(target: "prices", external_code = code, error = %e, "price lookup failed");
                continue;
            }
        };
        match detail
            .and_then(|d| d.precio)
            .and_then(|v| PriceQuote::from_syscom(&v))
        {
            Some(q) => {
                debug!(target: "prices", external_code = code, price = q.price, "price found");
                scan.found.push((p, q));
            }
            None => scan.no_price += 1,
        }
    }
    scan
}

/// Refresh zero or missing prices from the distributor detail endpoint.
pub async fn run(cfg: UpdatePricesConfig) -> Result<()> {
    let client = syscom_client(&cfg.upkeep)?;
    let db = connect_db().await?;
    let limit = cfg.mode.limit.unwrap_or(DEFAULT_LIMIT);
    let products = fetch_zero_price_with_external_code(&db, Some(limit)).await?;
    info!(target: "prices", products = products.len(), mode = cfg.mode.label(), "products without price");

    let QuoteScan {
        found: plan,
        no_price,
        errors: lookup_errors,
    } = collect_quotes(&client, &products).await;

    super::banner("Price refresh");
    println!("Products checked: {}", products.len());
    println!("Prices found:     {}", plan.len());
    println!("Without price:    {no_price}");
    println!("Lookup errors:    {lookup_errors}");
    for (p, q) in plan.iter().take(10) {
        println!("  {} -> {:.2}", clip(&p.title, 60), q.price);
    }

    if !cfg.mode.confirm(plan.len(), "price updates")? {
        return Ok(());
    }
    let (mut updated, mut errors) = (0usize, 0usize);
    for (p, q) in &plan {
        match update_price(&db, p.id, q.price, q.original_price).await {
            Ok(()) => updated += 1,
            Err(e) => {
                errors += 1;
                warn!(target: "prices", id = %p.id, error = %e, "price update failed");
            }
        }
    }
    println!("Updated: {updated}  Errors: {errors}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product(code: &str) -> ProductRow {
        ProductRow {
            external_code: Some(code.to_string()),
            ..ProductRow::new(code)
        }
    }

    #[tokio::test]
    async fn token_failures_are_counted_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let products = [product("1"), product("2"), ProductRow::new("sin codigo")];
        let scan = collect_quotes(&SyscomClient::against(&server.uri()), &products).await;
        assert_eq!(scan.errors, 2);
        assert!(scan.found.is_empty());
        assert_eq!(scan.no_price, 0);
    }

    #[tokio::test]
    async fn quotes_and_missing_prices_are_separated() {
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
            .and(path("/productos/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"producto_id": "1", "precios": {"precio_especial": 80, "precio_lista": 100}}),
            ))
            .mount(&server)
            .await;

        let products = [product("1"), product("2")];
        let scan = collect_quotes(&SyscomClient::against(&server.uri()), &products).await;
        assert_eq!(scan.found.len(), 1);
        assert_eq!(scan.found[0].0.id, products[0].id);
        assert_eq!(scan.found[0].1, PriceQuote { price: 80.0, original_price: Some(100.0) });
        assert_eq!(scan.no_price, 1);
        assert_eq!(scan.errors, 0);
    }
}
