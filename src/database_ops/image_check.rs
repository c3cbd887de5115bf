//! Broken-image report over the product table.
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use super::products::ProductRow;
use crate::catalog::{ImageProbe, ProbeOutcome};
use crate::normalization::images::{classify_reference, local_file, ImageRef};

pub const DEFAULT_PRODUCT_LIMIT: usize = 5000;
pub const DEFAULT_SAMPLE: usize = 200;
const TOP_ERRORS: usize = 10;

/// Unique trimmed image references mapped to the products using them, in
/// first-seen order.
pub fn collect_urls(products: &[ProductRow]) -> IndexMap<String, Vec<Uuid>> {
    let mut urls: IndexMap<String, Vec<Uuid>> = IndexMap::new();
    for p in products {
        for img in &p.images {
            let img = img.trim();
            if img.is_empty() {
                continue;
            }
            let ids = urls.entry(img.to_string()).or_default();
            if !ids.contains(&p.id) {
                ids.push(p.id);
            }
        }
    }
    urls
}

async fn check_one<P: ImageProbe>(probe: &P, reference: &str, public_dir: &Path) -> ProbeOutcome {
    match classify_reference(reference) {
        ImageRef::Remote(url) => probe.check(url).await,
        ImageRef::Local(path) if local_file(public_dir, path).is_file() => ProbeOutcome::Ok,
        ImageRef::Local(_) => ProbeOutcome::Failed("missing local file".to_string()),
        ImageRef::Invalid => ProbeOutcome::Failed("invalid reference".to_string()),
    }
}

/// Check every reference with at most `workers` in flight. Local paths are
/// checked on disk under `public_dir`.
pub async fn check_all<P: ImageProbe>(
    probe: &P,
    urls: &[String],
    workers: usize,
    public_dir: &Path,
) -> HashMap<String, ProbeOutcome> {
    stream::iter(urls.iter())
        .map(|url| async move { (url.clone(), check_one(probe, url, public_dir).await) })
        .buffer_unordered(workers.max(1))
        .collect()
        .await
}

/// A product with at least one image that failed its check.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenImages<'a> {
    pub product: &'a ProductRow,
    pub broken: Vec<String>,
    /// Remaining entries in their original order; unchecked ones are kept.
    pub kept: Vec<String>,
}

/// Split each product's images by the check results.
pub fn products_with_broken<'a>(
    products: &'a [ProductRow],
    results: &HashMap<String, ProbeOutcome>,
) -> Vec<BrokenImages<'a>> {
    products
        .iter()
        .filter_map(|p| {
            let (broken, kept): (Vec<String>, Vec<String>) = p
                .images
                .iter()
                .map(|img| img.trim())
                .filter(|img| !img.is_empty())
                .map(str::to_string)
                .partition(|img| results.get(img).is_some_and(|o| !o.is_ok()));
            (!broken.is_empty()).then_some(BrokenImages {
                product: p,
                broken,
                kept,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokenUrl {
    pub url: String,
    pub error: String,
    pub products: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokenReport {
    pub products_scanned: usize,
    pub total_urls: usize,
    pub checked: usize,
    pub ok: usize,
    pub broken: Vec<BrokenUrl>,
    /// (error label, url count), most frequent first.
    pub error_types: Vec<(String, usize)>,
    pub affected_products: usize,
}

impl BrokenReport {
    /// `sample` is the checked subset in the order it was taken from `urls`.
    pub fn build(
        products_scanned: usize,
        urls: &IndexMap<String, Vec<Uuid>>,
        sample: &[String],
        results: &HashMap<String, ProbeOutcome>,
    ) -> Self {
        let mut ok = 0usize;
        let mut broken = Vec::new();
        let mut histogram: HashMap<String, usize> = HashMap::new();
        let mut affected: HashSet<Uuid> = HashSet::new();
        for url in sample {
            let Some(outcome) = results.get(url) else {
                continue;
            };
            if outcome.is_ok() {
                ok += 1;
                continue;
            }
            let ids = urls.get(url).map(Vec::as_slice).unwrap_or_default();
            affected.extend(ids.iter().copied());
            let error = outcome.label();
            *histogram.entry(error.clone()).or_default() += 1;
            broken.push(BrokenUrl {
                url: url.clone(),
                error,
                products: ids.len(),
            });
        }
        let error_types = histogram
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(TOP_ERRORS)
            .collect();
        Self {
            products_scanned,
            total_urls: urls.len(),
            checked: ok + broken.len(),
            ok,
            broken,
            error_types,
            affected_products: affected.len(),
        }
    }

    pub fn broken_pct(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.broken.len() as f64 * 100.0 / self.checked as f64
        }
    }

    /// Broken share of the sample applied to every known URL.
    pub fn estimated_broken_total(&self) -> usize {
        if self.checked == 0 {
            0
        } else {
            self.broken.len() * self.total_urls / self.checked
        }
    }
}
