//! In-memory index over the vendor's CSV catalog export.
//!
//! The export starts with a title line, so the loader scans for the header
//! row instead of assuming its position. Loading never fails: a missing or
//! malformed file produces an empty index and a warning.
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::normalization::clave::{
    compact_clave, extract_candidates, hyphenate_clave, Candidate, CodeKind,
};
use crate::normalization::price::parse_price_text;

/// Description words shorter than this are not indexed.
const MIN_KEYWORD_LEN: usize = 4;
/// Shared keywords required before a fuzzy match is trusted.
const MIN_SHARED_KEYWORDS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub codigo: String,
    pub clave: Option<String>,
    pub descripcion: Option<String>,
    pub precio_publico: Option<f64>,
    pub precio_distribuidor: Option<f64>,
    pub familia: Option<String>,
    pub familia_desc: Option<String>,
}

impl CatalogRecord {
    pub fn new(codigo: &str, clave: Option<&str>, descripcion: Option<&str>) -> Self {
        Self {
            codigo: codigo.to_string(),
            clave: clave.map(str::to_string),
            descripcion: descripcion.map(str::to_string),
            precio_publico: None,
            precio_distribuidor: None,
            familia: None,
            familia_desc: None,
        }
    }

    /// Canonical clave spelling (hyphenated uppercase) when present.
    pub fn clave_key(&self) -> Option<String> {
        self.clave.as_deref().map(canonical_clave)
    }

    /// File/URL key preferred for this record: clave, else código.
    pub fn image_key(&self) -> String {
        self.clave_key().unwrap_or_else(|| self.codigo.clone())
    }
}

fn canonical_clave(raw: &str) -> String {
    hyphenate_clave(raw).unwrap_or_else(|| raw.trim().to_uppercase())
}

/// Column positions resolved from the header row.
#[derive(Debug, Default)]
struct Columns {
    codigo: usize,
    clave: Option<usize>,
    descripcion: Option<usize>,
    precio_publico: Option<usize>,
    precio_distribuidor: Option<usize>,
    familia: Option<usize>,
    familia_desc: Option<usize>,
}

/// Lowercase and drop Spanish accents so `Código` and `codigo` compare equal.
fn fold_header(h: &str) -> String {
    h.trim_start_matches('\u{feff}')
        .trim()
        .trim_matches('"')
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}

impl Columns {
    fn from_header(fields: &[String]) -> Option<Self> {
        let folded: Vec<String> = fields.iter().map(|f| fold_header(f)).collect();
        let find = |name: &str| folded.iter().position(|f| f == name);
        let find_prefix = |prefix: &str| folded.iter().position(|f| f.starts_with(prefix));
        Some(Self {
            codigo: find("codigo")?,
            clave: Some(find("clave")?),
            descripcion: find("descripcion"),
            precio_publico: find_prefix("precio publico"),
            precio_distribuidor: find_prefix("precio distribuidor"),
            familia: find("familia"),
            familia_desc: find("descripcion familia"),
        })
    }
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("valid regex"))
}

fn keywords_of(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut seen = HashSet::new();
    keyword_re()
        .find_iter(&upper)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default)]
pub struct CatalogIndex {
    records: Vec<CatalogRecord>,
    by_code: HashMap<String, usize>,
    by_clave: HashMap<String, usize>,
    keywords: HashMap<String, Vec<usize>>,
}

impl CatalogIndex {
    /// Load the CSV export at `path`. See the module docs for failure handling.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "catalog", path = %path.display(), error = %e, "catalog CSV not readable; using empty index");
                return Self::default();
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let index = Self::from_csv_text(&text);
        info!(target: "catalog", path = %path.display(), records = index.len(), claves = index.by_clave.len(), "catalog loaded");
        index
    }

    /// Parse an export already in memory.
    pub fn from_csv_text(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() < 2 {
            warn!(target: "catalog", "catalog CSV has fewer than two lines");
            return Self::default();
        }

        let header = lines.iter().enumerate().find_map(|(i, line)| {
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(line.as_bytes());
            let rec = rdr.records().next()?.ok()?;
            let fields: Vec<String> = rec.iter().map(str::to_string).collect();
            Columns::from_header(&fields).map(|cols| (i, cols))
        });
        let Some((header_at, cols)) = header else {
            warn!(target: "catalog", "no header row with both código and clave columns");
            return Self::default();
        };

        let body = lines[header_at + 1..].join("\n");
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut index = Self::default();
        let mut skipped = 0usize;
        for row in rdr.records() {
            let Ok(row) = row else {
                skipped += 1;
                continue;
            };
            let get = |idx: Option<usize>| {
                idx.and_then(|i| row.get(i))
                    .map(|s| s.trim().trim_matches('"').trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            let Some(codigo) = get(Some(cols.codigo)) else {
                skipped += 1;
                continue;
            };
            if !codigo.chars().all(|c| c.is_ascii_digit()) {
                skipped += 1;
                continue;
            }
            index.insert(CatalogRecord {
                codigo,
                clave: get(cols.clave),
                descripcion: get(cols.descripcion),
                precio_publico: get(cols.precio_publico).and_then(|p| parse_price_text(&p)),
                precio_distribuidor: get(cols.precio_distribuidor)
                    .and_then(|p| parse_price_text(&p)),
                familia: get(cols.familia),
                familia_desc: get(cols.familia_desc),
            });
        }
        if skipped > 0 {
            debug!(target: "catalog", skipped, "rows skipped (non-numeric código or malformed)");
        }
        index
    }

    /// Add one record; later rows with the same code or clave win.
    pub fn insert(&mut self, record: CatalogRecord) {
        let pos = self.records.len();
        self.by_code.insert(record.codigo.clone(), pos);
        if let Some(raw) = record.clave.as_deref() {
            let key = canonical_clave(raw);
            let compact = compact_clave(raw);
            if compact != key {
                self.by_clave.insert(compact, pos);
            }
            self.by_clave.insert(key, pos);
        }
        if let Some(desc) = record.descripcion.as_deref() {
            for word in keywords_of(desc) {
                self.keywords.entry(word).or_default().push(pos);
            }
        }
        self.records.push(record);
    }

    pub fn by_code(&self, code: &str) -> Option<&CatalogRecord> {
        self.by_code.get(code.trim()).map(|&i| &self.records[i])
    }

    /// Accepts hyphenated or compact spelling, any case.
    pub fn by_clave(&self, clave: &str) -> Option<&CatalogRecord> {
        self.by_clave
            .get(&canonical_clave(clave))
            .or_else(|| self.by_clave.get(&compact_clave(clave)))
            .map(|&i| &self.records[i])
    }

    pub fn lookup(&self, candidate: &Candidate) -> Option<&CatalogRecord> {
        match candidate.kind {
            CodeKind::Numeric6 | CodeKind::Numeric4 => self.by_code(&candidate.value),
            _ => self.by_clave(&candidate.lookup_key()),
        }
    }

    /// First extracted candidate (in priority order) with an index hit.
    pub fn find_in_text(&self, text: &str) -> Option<(Candidate, &CatalogRecord)> {
        extract_candidates(text)
            .into_iter()
            .find_map(|c| self.lookup(&c).map(|r| (c, r)))
    }

    /// Fuzzy fallback: the record sharing the most description keywords with
    /// `text`, provided it shares at least two. Ties go to the earlier row.
    pub fn match_by_keywords(&self, text: &str) -> Option<&CatalogRecord> {
        let mut hits: HashMap<usize, usize> = HashMap::new();
        for word in keywords_of(text) {
            if let Some(positions) = self.keywords.get(&word) {
                for &p in positions {
                    *hits.entry(p).or_default() += 1;
                }
            }
        }
        hits.into_iter()
            .filter(|(_, n)| *n >= MIN_SHARED_KEYWORDS)
            .max_by(|(pa, na), (pb, nb)| na.cmp(nb).then(pb.cmp(pa)))
            .map(|(p, _)| &self.records[p])
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
