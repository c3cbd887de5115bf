//! Price lists keyed by SKU, as exported by the distributor or edited by hand.
//!
//! Column names vary between exports (`sku`, `Variant SKU`, `Código`,
//! `precio`, `Variant Price`, `precio_lista`, ...) so columns are found by
//! keyword, and the delimiter is whichever of `,` `;` or tab the header uses
//! most.
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::products::ProductRow;
use crate::normalization::price::parse_price_text;

const SKU_KEYWORDS: [&str; 4] = ["sku", "codigo", "modelo", "articulo"];
const PRICE_KEYWORDS: [&str; 2] = ["precio", "price"];
const ORIGINAL_KEYWORDS: [&str; 4] = ["original", "lista", "antes", "compare"];

/// One usable row of the sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1-based line number in the file, header included.
    pub line: usize,
    pub sku: String,
    pub price: f64,
    /// Only kept when it is above `price`.
    pub original_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSheet {
    pub rows: Vec<SheetRow>,
    /// Rows without a SKU or a positive price.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SheetColumns {
    sku: usize,
    price: usize,
    original: Option<usize>,
}

fn fold(h: &str) -> String {
    h.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            '_' => ' ',
            other => other,
        })
        .collect()
}

fn sniff_delimiter(header: &str) -> u8 {
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| header.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

impl SheetColumns {
    fn from_header(fields: &[String]) -> Option<Self> {
        let folded: Vec<String> = fields.iter().map(|f| fold(f)).collect();
        let is_original = |f: &str| ORIGINAL_KEYWORDS.iter().any(|k| f.contains(k));
        let sku = folded
            .iter()
            .position(|f| f == "variant sku")
            .or_else(|| folded.iter().position(|f| SKU_KEYWORDS.iter().any(|k| f.contains(k))))?;
        let price = folded.iter().position(|f| {
            PRICE_KEYWORDS.iter().any(|k| f.contains(k)) && !is_original(f)
        })?;
        let original = folded
            .iter()
            .position(|f| PRICE_KEYWORDS.iter().any(|k| f.contains(k)) && is_original(f));
        Some(Self {
            sku,
            price,
            original,
        })
    }
}

impl PriceSheet {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading price sheet {}", path.display()))?;
        let sheet = Self::from_csv_text(&text)
            .with_context(|| format!("parsing price sheet {}", path.display()))?;
        info!(target: "prices", path = %path.display(), rows = sheet.rows.len(), rejected = sheet.rejected, "price sheet loaded");
        Ok(sheet)
    }

    /// The first line is the header; it must name a SKU and a price column.
    pub fn from_csv_text(text: &str) -> Result<Self> {
        let Some(header_line) = text.lines().next() else {
            bail!("price sheet is empty");
        };
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(sniff_delimiter(header_line))
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());
        let fields: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let Some(cols) = SheetColumns::from_header(&fields) else {
            bail!("no SKU and price columns in header: {}", fields.join(", "));
        };
        debug!(target: "prices", ?cols, "price sheet columns");

        let mut sheet = Self::default();
        for (i, row) in rdr.records().enumerate() {
            let Ok(row) = row else {
                sheet.rejected += 1;
                continue;
            };
            let sku = row.get(cols.sku).map(str::trim).unwrap_or_default();
            let price = row
                .get(cols.price)
                .and_then(parse_price_text)
                .filter(|p| *p > 0.0);
            let (false, Some(price)) = (sku.is_empty(), price) else {
                sheet.rejected += 1;
                continue;
            };
            let original_price = cols
                .original
                .and_then(|c| row.get(c))
                .and_then(parse_price_text)
                .filter(|o| *o > price);
            sheet.rows.push(SheetRow {
                line: i + 2,
                sku: sku.to_string(),
                price,
                original_price,
            });
        }
        Ok(sheet)
    }
}

/// Normalized SKU used to join the sheet with the product table.
pub fn sku_key(sku: &str) -> String {
    sku.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetUpdate {
    pub id: Uuid,
    pub title: String,
    pub sku: String,
    pub current: Option<f64>,
    pub price: f64,
    pub original_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetPlan {
    pub updates: Vec<SheetUpdate>,
    pub not_found: Vec<String>,
    /// Rows whose price already matches and carry no list price.
    pub unchanged: usize,
}

/// Join sheet rows to products by SKU. When several products share a SKU
/// the first one wins unless a later one has no price yet.
pub fn plan_sheet_updates(sheet: &PriceSheet, products: &[ProductRow]) -> SheetPlan {
    let mut by_sku: HashMap<String, &ProductRow> = HashMap::new();
    for p in products {
        let Some(key) = p.sku.as_deref().map(sku_key).filter(|k| !k.is_empty()) else {
            continue;
        };
        let unpriced = |r: &ProductRow| r.price.unwrap_or(0.0) == 0.0;
        by_sku
            .entry(key)
            .and_modify(|cur| {
                if unpriced(p) && !unpriced(*cur) {
                    *cur = p;
                }
            })
            .or_insert(p);
    }

    let mut plan = SheetPlan::default();
    for row in &sheet.rows {
        let Some(p) = by_sku.get(&sku_key(&row.sku)) else {
            plan.not_found.push(row.sku.clone());
            continue;
        };
        if p.price == Some(row.price) && row.original_price.is_none() {
            plan.unchanged += 1;
            continue;
        }
        plan.updates.push(SheetUpdate {
            id: p.id,
            title: p.title.clone(),
            sku: row.sku.clone(),
            current: p.price,
            price: row.price,
            original_price: row.original_price,
        });
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_sheet_with_list_price() {
        let text = "sku,precio,precio_original\n\
                    DS-2CD1043,\"$1,299.00\",1500\n\
                    ,100,\n\
                    X-1,0,\n\
                    X-2,abc,\n\
                    X-3,99.5,80\n";
        let sheet = PriceSheet::from_csv_text(text).unwrap();
        assert_eq!(sheet.rejected, 3);
        assert_eq!(
            sheet.rows[0],
            SheetRow {
                line: 2,
                sku: "DS-2CD1043".to_string(),
                price: 1299.0,
                original_price: Some(1500.0),
            }
        );
        assert_eq!(sheet.rows[1].line, 6);
        assert_eq!(sheet.rows[1].original_price, None);
    }

    #[test]
    fn shop_export_columns_and_semicolons() {
        let text = "\u{feff}Handle;Variant SKU;Variant Price;Variant Compare At Price\n\
                    camara;CAM-1;MXN 850;999\n";
        let sheet = PriceSheet::from_csv_text(text).unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].sku, "CAM-1");
        assert_eq!(sheet.rows[0].price, 850.0);
        assert_eq!(sheet.rows[0].original_price, Some(999.0));
    }

    #[test]
    fn header_without_price_is_an_error() {
        let err = PriceSheet::from_csv_text("sku,nombre\nA,b\n").unwrap_err();
        assert!(err.to_string().contains("no SKU and price columns"));
        assert!(PriceSheet::from_csv_text("").is_err());
    }

    fn product(sku: &str, price: f64) -> ProductRow {
        ProductRow {
            sku: Some(sku.to_string()),
            price: Some(price),
            ..ProductRow::new(sku)
        }
    }

    #[test]
    fn plan_prefers_unpriced_duplicate_and_skips_unchanged() {
        let products = [
            product("cam-1", 500.0),
            product("CAM-1 ", 0.0),
            product("CAM-2", 99.5),
        ];
        let sheet = PriceSheet::from_csv_text("sku,precio\nCAM-1,850\ncam-2,99.5\nNOPE,10\n").unwrap();
        let plan = plan_sheet_updates(&sheet, &products);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, products[1].id);
        assert_eq!(plan.updates[0].current, Some(0.0));
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.not_found, vec!["NOPE".to_string()]);
    }
}
