//! Match products to image files already present in the local vendor folder.
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use strsim::jaro_winkler;
use tracing::{debug, warn};

use crate::normalization::clave::{compact_clave, extract_candidates, product_text};

/// Prefixes the vendor uses for kit, replacement and display variants.
const VARIATION_PREFIXES: [&str; 4] = ["INT-", "CB-", "REP-", "CJ-"];
/// Brand words that appear in most titles and say nothing about the item.
const GENERIC_WORDS: [&str; 4] = ["TRUPER", "EXPERT", "PRO", "INDUSTRIAL"];
const MIN_CONTAINED_CLAVE: usize = 6;
const MIN_KEYWORD: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    Variation,
    Contains,
    NumericCode,
    Keyword,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::Variation => "variation",
            MatchStrategy::Contains => "contains",
            MatchStrategy::NumericCode => "numeric_code",
            MatchStrategy::Keyword => "keyword",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMatch {
    pub site_path: String,
    pub strategy: MatchStrategy,
}

/// Image files in one directory keyed by uppercased stem.
#[derive(Debug, Default, Clone)]
pub struct LocalImageSet {
    by_stem: BTreeMap<String, String>,
}

fn numeric_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4,6})\b").expect("valid regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{3,6})\b").expect("valid regex"))
}

impl LocalImageSet {
    /// Scan `dir` for `.jpg`/`.webp` files; `site_prefix` is prepended to
    /// each file name to form the stored path. A missing dir yields an empty set.
    pub fn scan(dir: &Path, site_prefix: &str) -> Self {
        let mut set = Self::default();
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(target: "local_match", dir = %dir.display(), error = %e, "image directory not readable");
                return set;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if !matches!(ext.as_deref(), Some("jpg") | Some("webp")) {
                continue;
            }
            let (Some(stem), Some(name)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            // .jpg wins over .webp for the same stem
            let key = stem.to_uppercase();
            let site = format!("{site_prefix}{name}");
            if ext.as_deref() == Some("jpg") || !set.by_stem.contains_key(&key) {
                set.by_stem.insert(key, site);
            }
        }
        debug!(target: "local_match", dir = %dir.display(), files = set.len(), "local images scanned");
        set
    }

    pub fn insert(&mut self, stem: &str, site_path: &str) {
        self.by_stem
            .insert(stem.to_uppercase(), site_path.to_string());
    }

    pub fn get(&self, stem: &str) -> Option<&str> {
        self.by_stem.get(&stem.to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_stem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stem.is_empty()
    }

    /// Stem containing `needle` that is most similar to it.
    fn best_containing(&self, needle: &str) -> Option<&str> {
        let mut best: Option<(f64, &str)> = None;
        for (stem, path) in &self.by_stem {
            if !stem.contains(needle) {
                continue;
            }
            let score = jaro_winkler(needle, stem);
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, path.as_str()));
            }
        }
        best.map(|(_, p)| p)
    }

    /// Best local image for a product, trying the strategies in order:
    /// exact clave, clave variations, clave containment, numeric code, keyword.
    pub fn best_match(&self, title: &str, description: Option<&str>) -> Option<LocalMatch> {
        let text = product_text(title, description);
        let upper = text.to_uppercase();
        let found = |path: &str, strategy| {
            Some(LocalMatch {
                site_path: path.to_string(),
                strategy,
            })
        };

        for cand in extract_candidates(&text)
            .into_iter()
            .filter(|c| c.kind.is_clave())
        {
            let clave = cand.lookup_key();
            if let Some(p) = self.get(&clave) {
                return found(p, MatchStrategy::Exact);
            }
            let compact = compact_clave(&clave);
            let variations = std::iter::once(compact)
                .chain(VARIATION_PREFIXES.iter().map(|p| format!("{p}{clave}")));
            for v in variations {
                if let Some(p) = self.get(&v) {
                    return found(p, MatchStrategy::Variation);
                }
            }
            if clave.len() >= MIN_CONTAINED_CLAVE {
                if let Some(p) = self.best_containing(&clave) {
                    return found(p, MatchStrategy::Contains);
                }
            }
        }

        if let Some(code) = numeric_code_re().captures(&text).and_then(|c| c.get(1)) {
            if let Some(p) = self.best_containing(code.as_str()) {
                return found(p, MatchStrategy::NumericCode);
            }
        }

        for word in word_re()
            .captures_iter(&upper)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
        {
            if GENERIC_WORDS.contains(&word) || word.len() < MIN_KEYWORD {
                continue;
            }
            if let Some(p) = self.best_containing(word) {
                return found(p, MatchStrategy::Keyword);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/images/marketplace/truper/";

    fn set(stems: &[&str]) -> LocalImageSet {
        let mut s = LocalImageSet::default();
        for stem in stems {
            s.insert(stem, &format!("{PREFIX}{stem}.jpg"));
        }
        s
    }

    #[test]
    fn exact_clave_wins() {
        let s = set(&["RMAX-7NX", "INT-RMAX-7NX"]);
        let m = s.best_match("RMAX-7NX - Rotomartillo", None).unwrap();
        assert_eq!(m.site_path, format!("{PREFIX}RMAX-7NX.jpg"));
        assert_eq!(m.strategy, MatchStrategy::Exact);
    }

    #[test]
    fn variations_are_tried() {
        let s = set(&["CB-PET-15X"]);
        let m = s.best_match("Pinza PET-15X", None).unwrap();
        assert_eq!(m.strategy, MatchStrategy::Variation);
        let s = set(&["PET15X"]);
        assert_eq!(s.best_match("Pinza PET-15X", None).unwrap().strategy, MatchStrategy::Variation);
    }

    #[test]
    fn long_clave_matches_by_containment() {
        let s = set(&["RMAX-7NX-KIT", "RMAX-7NX-KIT-COMPLETO-2"]);
        let m = s.best_match("RMAX-7NX Rotomartillo", None).unwrap();
        assert_eq!(m.strategy, MatchStrategy::Contains);
        assert_eq!(m.site_path, format!("{PREFIX}RMAX-7NX-KIT.jpg"));
        // short claves never match by containment
        assert!(set(&["XAB-1Z"]).best_match("Llave AB-1", None).is_none());
    }

    #[test]
    fn numeric_code_and_keyword_fallbacks() {
        let s = set(&["IMG_17158", "DISCO-CORTE"]);
        assert_eq!(
            s.best_match("Pinza codigo 17158", None).unwrap().strategy,
            MatchStrategy::NumericCode
        );
        let m = s.best_match("Truper disco de corte", Some("PRO")).unwrap();
        assert_eq!(m.strategy, MatchStrategy::Keyword);
        assert!(set(&["TRUPER"]).best_match("Truper", None).is_none());
    }

    #[test]
    fn scan_reads_jpg_and_webp() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["a-1.jpg", "B-2.webp", "c.png", "a-1.webp"] {
            std::fs::write(dir.path().join(f), b"x").unwrap();
        }
        let s = LocalImageSet::scan(dir.path(), PREFIX);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get("A-1"), Some("/images/marketplace/truper/a-1.jpg"));
        assert_eq!(s.get("b-2"), Some("/images/marketplace/truper/B-2.webp"));
        assert!(LocalImageSet::scan(&dir.path().join("nope"), PREFIX).is_empty());
    }
}
