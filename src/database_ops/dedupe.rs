//! Duplicate product detection by SKU or external code.
//!
//! Within each group the best-scoring row is kept and the rest are
//! soft-deleted (`status = 'deleted'`); nothing is removed physically.
use indexmap::IndexMap;
use uuid::Uuid;

use super::products::ProductRow;

pub const DELETED_STATUS: &str = "deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKey {
    Sku,
    ExternalCode,
}

impl DuplicateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKey::Sku => "sku",
            DuplicateKey::ExternalCode => "external_code",
        }
    }

    fn of(&self, row: &ProductRow) -> Option<String> {
        let raw = match self {
            DuplicateKey::Sku => row.sku.as_deref().map(|s| s.trim().to_uppercase()),
            DuplicateKey::ExternalCode => row.external_code.as_deref().map(|s| s.trim().to_string()),
        };
        raw.filter(|s| !s.is_empty())
    }
}

/// Higher = better candidate to keep: priced rows, more images, longer
/// descriptions, and finally the most recent row.
pub fn score_product(row: &ProductRow) -> i64 {
    let mut score = 0i64;
    if row.price.unwrap_or(0.0) > 0.0 {
        score += 100;
    }
    score += row.images.len() as i64 * 10;
    if let Some(desc) = row.description.as_deref() {
        score += (desc.chars().count() as i64 / 10).min(50);
    }
    if let Some(created) = row.created_at {
        score += created.timestamp();
    }
    score
}

/// Groups with more than one row, keyed by the normalized value, in
/// first-seen order.
pub fn group_duplicates(rows: &[ProductRow], key: DuplicateKey) -> IndexMap<String, Vec<&ProductRow>> {
    let mut groups: IndexMap<String, Vec<&ProductRow>> = IndexMap::new();
    for row in rows {
        if let Some(k) = key.of(row) {
            groups.entry(k).or_default().push(row);
        }
    }
    groups.retain(|_, g| g.len() > 1);
    groups
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub key: String,
    pub id: Uuid,
    pub title: String,
    pub keep_id: Uuid,
    pub keep_title: String,
}

/// Keep the best row of each group (ties go to the earlier row).
pub fn plan_removals(groups: &IndexMap<String, Vec<&ProductRow>>) -> Vec<Removal> {
    let mut out = Vec::new();
    for (key, rows) in groups {
        let mut ranked: Vec<&ProductRow> = rows.clone();
        // stable sort keeps input order among equal scores
        ranked.sort_by_key(|r| std::cmp::Reverse(score_product(r)));
        let Some((keep, rest)) = ranked.split_first() else {
            continue;
        };
        for dup in rest {
            out.push(Removal {
                key: key.clone(),
                id: dup.id,
                title: dup.title.clone(),
                keep_id: keep.id,
                keep_title: keep.title.clone(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(sku: &str, price: f64, images: usize) -> ProductRow {
        ProductRow {
            sku: Some(sku.to_string()),
            price: Some(price),
            images: (0..images).map(|i| format!("/i/{i}.jpg")).collect(),
            ..ProductRow::new(sku)
        }
    }

    #[test]
    fn score_prefers_priced_rows_with_images() {
        let mut r = row("A", 10.0, 2);
        r.description = Some("x".repeat(1000));
        assert_eq!(score_product(&r), 100 + 20 + 50);
        r.created_at = Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(score_product(&r), 170 + 1_700_000_000);
        assert_eq!(score_product(&row("B", 0.0, 0)), 0);
    }

    #[test]
    fn groups_normalize_sku_case_and_spaces() {
        let rows = vec![row("abc-1", 1.0, 0), row(" ABC-1 ", 1.0, 0), row("zzz", 1.0, 0)];
        let groups = group_duplicates(&rows, DuplicateKey::Sku);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["ABC-1"].len(), 2);
        assert!(group_duplicates(&rows, DuplicateKey::ExternalCode).is_empty());
    }

    #[test]
    fn best_row_is_kept() {
        let rows = vec![row("S", 0.0, 0), row("S", 5.0, 1), row("S", 5.0, 1)];
        let groups = group_duplicates(&rows, DuplicateKey::Sku);
        let plan = plan_removals(&groups);
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|r| r.keep_id == rows[1].id));
        assert_eq!(plan[0].id, rows[2].id);
        assert_eq!(plan[1].id, rows[0].id);
    }
}
