//! Access to `marketplace_products` and `marketplace_categories`.
//!
//! The table belongs to the hosted marketplace; these helpers only read
//! pages of rows and apply narrow updates (images, price, status) or bulk
//! inserts for distributor imports.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::db::{is_transient, Db};

pub const PAGE_SIZE: i64 = 1000;
const INSERT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub external_code: Option<String>,
    pub sku: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ProductRow {
    /// Minimal row for tests and offline planning.
    pub fn new(title: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            images: Vec::new(),
            price: None,
            original_price: None,
            external_code: None,
            sku: None,
            status: Some("active".to_string()),
            created_at: None,
        }
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
            description: row.try_get("description")?,
            images: row
                .try_get::<Option<Vec<String>>, _>("images")?
                .unwrap_or_default(),
            price: row.try_get("price")?,
            original_price: row.try_get("original_price")?,
            external_code: row.try_get("external_code")?,
            sku: row.try_get("sku")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Row shape for inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub condition: String,
    pub category_id: Option<Uuid>,
    pub images: Vec<String>,
    pub location_city: String,
    pub location_zone: String,
    pub status: String,
    pub contact_phone: String,
    pub external_code: Option<String>,
    pub sku: Option<String>,
}

/// Which slice of the table a paged read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFilter {
    Active,
    ActiveWithSku,
    ActiveWithExternalCode,
    ZeroPriceWithExternalCode,
    /// Priced distributor rows whose `images` array is empty.
    ExternalCodeWithoutImages,
}

impl ProductFilter {
    fn predicate(&self) -> &'static str {
        match self {
            ProductFilter::Active => "status = 'active'",
            ProductFilter::ActiveWithSku => {
                "status = 'active' AND sku IS NOT NULL AND btrim(sku) <> ''"
            }
            ProductFilter::ActiveWithExternalCode => {
                "status = 'active' AND external_code IS NOT NULL AND btrim(external_code) <> ''"
            }
            ProductFilter::ZeroPriceWithExternalCode => {
                "status = 'active' AND external_code IS NOT NULL AND (price IS NULL OR price = 0)"
            }
            ProductFilter::ExternalCodeWithoutImages => {
                "status = 'active' AND price > 0 AND external_code IS NOT NULL \
                 AND btrim(external_code) <> '' AND coalesce(cardinality(images), 0) = 0"
            }
        }
    }
}

const SELECT_COLUMNS: &str = "id, title, description, images, price::float8 AS price, \
     original_price::float8 AS original_price, external_code, sku, status, created_at";

/// Keyset-paged read in id order, `PAGE_SIZE` rows per round trip.
pub async fn fetch_products(
    db: &Db,
    filter: ProductFilter,
    limit: Option<usize>,
) -> Result<Vec<ProductRow>> {
    let mut out: Vec<ProductRow> = Vec::new();
    let mut after: Option<Uuid> = None;
    loop {
        let page = match limit {
            Some(l) => PAGE_SIZE.min((l.saturating_sub(out.len())) as i64),
            None => PAGE_SIZE,
        };
        if page <= 0 {
            break;
        }
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM public.marketplace_products \
             WHERE {} AND ($1::uuid IS NULL OR id > $1) ORDER BY id LIMIT $2",
            filter.predicate()
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(after)
            .bind(page)
            .fetch_all(&db.pool)
            .await
            .with_context(|| format!("fetching products ({filter:?})"))?;
        let n = rows.len();
        for row in &rows {
            out.push(ProductRow::from_row(row)?);
        }
        after = out.last().map(|p| p.id);
        debug!(target: "products", fetched = out.len(), "page read");
        if (n as i64) < page {
            break;
        }
    }
    info!(target: "products", ?filter, rows = out.len(), "products fetched");
    Ok(out)
}

pub async fn fetch_active_products(db: &Db, limit: Option<usize>) -> Result<Vec<ProductRow>> {
    fetch_products(db, ProductFilter::Active, limit).await
}

pub async fn fetch_with_sku(db: &Db) -> Result<Vec<ProductRow>> {
    fetch_products(db, ProductFilter::ActiveWithSku, None).await
}

pub async fn fetch_with_external_code(db: &Db) -> Result<Vec<ProductRow>> {
    fetch_products(db, ProductFilter::ActiveWithExternalCode, None).await
}

pub async fn fetch_zero_price_with_external_code(
    db: &Db,
    limit: Option<usize>,
) -> Result<Vec<ProductRow>> {
    fetch_products(db, ProductFilter::ZeroPriceWithExternalCode, limit).await
}

pub async fn fetch_external_code_without_images(
    db: &Db,
    limit: Option<usize>,
) -> Result<Vec<ProductRow>> {
    fetch_products(db, ProductFilter::ExternalCodeWithoutImages, limit).await
}

/// External codes (as stored) and SKUs (uppercased) already in the table.
pub async fn existing_codes_and_skus(db: &Db) -> Result<(HashSet<String>, HashSet<String>)> {
    let rows = sqlx::query(
        "SELECT external_code, sku FROM public.marketplace_products \
         WHERE external_code IS NOT NULL OR sku IS NOT NULL",
    )
    .persistent(false)
    .fetch_all(&db.pool)
    .await
    .context("reading existing external codes")?;
    let mut codes = HashSet::new();
    let mut skus = HashSet::new();
    for row in rows {
        if let Some(c) = row.try_get::<Option<String>, _>("external_code")? {
            let c = c.trim().to_string();
            if !c.is_empty() {
                codes.insert(c);
            }
        }
        if let Some(s) = row.try_get::<Option<String>, _>("sku")? {
            let s = s.trim().to_uppercase();
            if !s.is_empty() {
                skus.insert(s);
            }
        }
    }
    Ok((codes, skus))
}

pub async fn update_images(db: &Db, id: Uuid, images: &[String]) -> Result<()> {
    sqlx::query(
        "UPDATE public.marketplace_products SET images = $2, updated_at = NOW() WHERE id = $1",
    )
    .persistent(false)
    .bind(id)
    .bind(images)
    .execute(&db.pool)
    .await
    .with_context(|| format!("updating images of {id}"))?;
    Ok(())
}

pub async fn update_price(db: &Db, id: Uuid, price: f64, original_price: Option<f64>) -> Result<()> {
    sqlx::query(
        "UPDATE public.marketplace_products \
         SET price = $2, original_price = $3, updated_at = NOW() WHERE id = $1",
    )
    .persistent(false)
    .bind(id)
    .bind(price)
    .bind(original_price)
    .execute(&db.pool)
    .await
    .with_context(|| format!("updating price of {id}"))?;
    Ok(())
}

/// Like [`update_price`] but leaves `original_price` untouched when no new
/// list price is given.
pub async fn update_price_keep_original(
    db: &Db,
    id: Uuid,
    price: f64,
    original_price: Option<f64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE public.marketplace_products \
         SET price = $2, original_price = COALESCE($3, original_price), updated_at = NOW() \
         WHERE id = $1",
    )
    .persistent(false)
    .bind(id)
    .bind(price)
    .bind(original_price)
    .execute(&db.pool)
    .await
    .with_context(|| format!("updating price of {id}"))?;
    Ok(())
}

pub async fn set_status(db: &Db, id: Uuid, status: &str) -> Result<()> {
    sqlx::query(
        "UPDATE public.marketplace_products SET status = $2, updated_at = NOW() WHERE id = $1",
    )
    .persistent(false)
    .bind(id)
    .bind(status)
    .execute(&db.pool)
    .await
    .with_context(|| format!("setting status of {id}"))?;
    Ok(())
}

pub async fn category_id_by_slug(db: &Db, slug: &str) -> Result<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM public.marketplace_categories WHERE slug = $1 LIMIT 1",
    )
    .persistent(false)
    .bind(slug)
    .fetch_optional(&db.pool)
    .await
    .with_context(|| format!("looking up category {slug}"))?;
    Ok(id)
}

/// One multi-row INSERT; returns the new ids.
pub async fn insert_products(db: &Db, batch: &[NewProduct]) -> Result<Vec<Uuid>, sqlx::Error> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO public.marketplace_products (seller_id, title, description, price, \
         original_price, condition, category_id, images, location_city, location_zone, status, \
         contact_phone, external_code, sku, created_at, updated_at) ",
    );
    qb.push_values(batch, |mut b, p| {
        b.push("NULL")
            .push_bind(&p.title)
            .push_bind(&p.description)
            .push_bind(p.price)
            .push_bind(p.original_price)
            .push_bind(&p.condition)
            .push_bind(p.category_id)
            .push_bind((!p.images.is_empty()).then_some(&p.images))
            .push_bind(&p.location_city)
            .push_bind(&p.location_zone)
            .push_bind(&p.status)
            .push_bind(&p.contact_phone)
            .push_bind(&p.external_code)
            .push_bind(&p.sku)
            .push("NOW()")
            .push("NOW()");
    });
    qb.push(" RETURNING id");
    let rows = qb.build().persistent(false).fetch_all(&db.pool).await?;
    rows.iter().map(|r| r.try_get::<Uuid, _>("id")).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub errors: usize,
}

/// Batch insert with a fixed number of retries on transient errors, then a
/// row-by-row fallback so one bad row does not sink the whole batch.
pub async fn insert_with_retry(db: &Db, batch: &[NewProduct]) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    for attempt in 1..=INSERT_ATTEMPTS {
        match insert_products(db, batch).await {
            Ok(ids) => {
                outcome.inserted = ids.len();
                return outcome;
            }
            Err(e) if is_transient(&e) && attempt < INSERT_ATTEMPTS => {
                warn!(target: "import", attempt, error = %e, "batch insert failed; retrying");
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
            Err(e) => {
                warn!(target: "import", attempt, size = batch.len(), error = %e, "batch insert failed; inserting one by one");
                break;
            }
        }
    }
    for p in batch {
        match insert_products(db, std::slice::from_ref(p)).await {
            Ok(ids) => outcome.inserted += ids.len(),
            Err(e) => {
                outcome.errors += 1;
                warn!(target: "import", title = %p.title, external_code = ?p.external_code, error = %e, "row insert failed");
            }
        }
    }
    outcome
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceStats {
    pub total: i64,
    pub zero_or_null: i64,
    pub with_external_code: i64,
    pub avg: Option<f64>,
    pub max: Option<f64>,
}

pub async fn price_stats(db: &Db) -> Result<PriceStats> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE price IS NULL OR price = 0) AS zero_or_null, \
                COUNT(*) FILTER (WHERE external_code IS NOT NULL) AS with_external_code, \
                AVG(price)::float8 AS avg, MAX(price)::float8 AS max \
         FROM public.marketplace_products WHERE status = 'active'",
    )
    .persistent(false)
    .fetch_one(&db.pool)
    .await
    .context("reading price statistics")?;
    Ok(PriceStats {
        total: row.try_get("total")?,
        zero_or_null: row.try_get("zero_or_null")?,
        with_external_code: row.try_get("with_external_code")?,
        avg: row.try_get("avg")?,
        max: row.try_get("max")?,
    })
}
