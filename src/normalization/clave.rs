//! Product identifier extraction from free text.
//!
//! Vendor titles carry either an alphanumeric *clave* (`RMAX-7NX`) or a
//! numeric catalog *código* (`100048`). Every command that needs to tie a
//! product row back to the vendor catalog goes through [`extract_candidates`],
//! which returns candidates tagged by [`CodeKind`], most specific first.
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Pattern family that produced a candidate, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodeKind {
    /// Hyphenated clave anchored at the start of the title (`RMAX-7NX - ...`).
    HyphenPrefix,
    /// Hyphenated clave anywhere in the text.
    HyphenAnywhere,
    /// Clave written without its hyphen (`RMAX7NX`).
    NoHyphen,
    /// 5-6 digit catalog code.
    Numeric6,
    /// 4 digit code, last resort.
    Numeric4,
}

impl CodeKind {
    /// Lower = tried first.
    pub fn priority(&self) -> u8 {
        match self {
            CodeKind::HyphenPrefix => 1,
            CodeKind::HyphenAnywhere => 2,
            CodeKind::NoHyphen => 3,
            CodeKind::Numeric6 => 4,
            CodeKind::Numeric4 => 5,
        }
    }

    pub fn is_clave(&self) -> bool {
        matches!(
            self,
            CodeKind::HyphenPrefix | CodeKind::HyphenAnywhere | CodeKind::NoHyphen
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::HyphenPrefix => "hyphen_prefix",
            CodeKind::HyphenAnywhere => "hyphen_anywhere",
            CodeKind::NoHyphen => "no_hyphen",
            CodeKind::Numeric6 => "numeric6",
            CodeKind::Numeric4 => "numeric4",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted identifier. `value` is exactly what matched (uppercased).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CodeKind,
    pub value: String,
}

impl Candidate {
    pub fn new(kind: CodeKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Canonical key used against the catalog index: claves are probed in
    /// their hyphenated uppercase spelling, codes as bare digits.
    pub fn lookup_key(&self) -> String {
        if self.kind.is_clave() {
            hyphenate_clave(&self.value).unwrap_or_else(|| self.value.to_ascii_uppercase())
        } else {
            self.value.clone()
        }
    }
}

fn hyphen_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]{2,6}-\d{1,4}[A-Z]{0,2})(?:\s*-|\s+|$)").expect("valid regex")
    })
}

fn hyphen_anywhere_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{2,6}-\d{1,4}[A-Z]{0,2})\b").expect("valid regex"))
}

fn no_hyphen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{2,6})(\d{1,4})([A-Z]{0,2})\b").expect("valid regex"))
}

fn numeric6_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{5,6})\b").expect("valid regex"))
}

fn numeric4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})\b").expect("valid regex"))
}

fn clave_grammar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{2,6})(\d{1,4}[A-Z]{0,2})$").expect("valid regex"))
}

/// Extract identifier candidates from `text`, most specific first.
///
/// Patterns run on the uppercased text. Every match of a kind is returned,
/// but a value already produced by an earlier kind is not repeated, so the
/// prefix clave of `"RMAX-7NX - Rotomartillo"` appears once, as
/// [`CodeKind::HyphenPrefix`].
pub fn extract_candidates(text: &str) -> Vec<Candidate> {
    let upper = text.trim().to_uppercase();
    let mut out: Vec<Candidate> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |kind: CodeKind, value: &str, out: &mut Vec<Candidate>| {
        if seen.insert(value.to_string()) {
            out.push(Candidate::new(kind, value));
        }
    };

    if let Some(c) = hyphen_prefix_re().captures(&upper).and_then(|c| c.get(1)) {
        push(CodeKind::HyphenPrefix, c.as_str(), &mut out);
    }
    for c in hyphen_anywhere_re().captures_iter(&upper) {
        if let Some(m) = c.get(1) {
            push(CodeKind::HyphenAnywhere, m.as_str(), &mut out);
        }
    }
    for c in no_hyphen_re().captures_iter(&upper) {
        if let Some(m) = c.get(0) {
            push(CodeKind::NoHyphen, m.as_str(), &mut out);
        }
    }
    for c in numeric6_re().captures_iter(&upper) {
        if let Some(m) = c.get(1) {
            push(CodeKind::Numeric6, m.as_str(), &mut out);
        }
    }
    for c in numeric4_re().captures_iter(&upper) {
        if let Some(m) = c.get(1) {
            push(CodeKind::Numeric4, m.as_str(), &mut out);
        }
    }
    out
}

/// Title and description joined the way every matcher expects them.
pub fn product_text(title: &str, description: Option<&str>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => format!("{} {}", title.trim(), d),
        None => title.trim().to_string(),
    }
}

/// Uppercase and strip hyphens: `rmax-7nx` -> `RMAX7NX`.
pub fn compact_clave(clave: &str) -> String {
    clave
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Re-insert the hyphen at the first letter/digit boundary.
///
/// Returns `None` unless the compacted input matches the clave grammar
/// `[A-Z]{2,6}\d{1,4}[A-Z]{0,2}`.
pub fn hyphenate_clave(clave: &str) -> Option<String> {
    let compact = compact_clave(clave);
    let caps = clave_grammar_re().captures(&compact)?;
    Some(format!("{}-{}", &caps[1], &caps[2]))
}
