//! Transforms over a product's `images` array.
//!
//! The column is an ordered list with no uniqueness constraint; entries are
//! absolute URLs or site-relative paths under the public web root.
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use crate::config::render_template;

/// Key used to detect near-duplicates: case, spaces and `%20` are ignored.
pub fn near_duplicate_key(img: &str) -> String {
    img.trim().to_lowercase().replace(' ', "").replace("%20", "")
}

/// Trim, drop blanks, and remove exact and near duplicates while keeping the
/// first occurrence of each image in its original position.
pub fn dedupe_images<S: AsRef<str>>(images: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(images.len());
    for img in images {
        let clean = img.as_ref().trim();
        if clean.is_empty() {
            continue;
        }
        if seen.insert(near_duplicate_key(clean)) {
            out.push(clean.to_string());
        }
    }
    out
}

/// Duplicate analysis for one product's images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    /// Exact duplicates and how many times each appears (> 1).
    pub exact: Vec<(String, usize)>,
    /// Pairs that differ only by case, spaces or `%20`.
    pub similar: Vec<(String, String)>,
    pub before: usize,
    pub after: usize,
}

impl DuplicateReport {
    pub fn analyze<S: AsRef<str>>(images: &[S]) -> Self {
        let cleaned: Vec<&str> = images
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .collect();

        let mut counts: indexmap::IndexMap<&str, usize> = indexmap::IndexMap::new();
        for img in cleaned.iter().copied() {
            *counts.entry(img).or_default() += 1;
        }
        let exact = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(img, n)| (img.to_string(), *n))
            .collect();

        let mut similar = Vec::new();
        for (i, a) in cleaned.iter().enumerate() {
            for b in cleaned.iter().skip(i + 1) {
                if a != b && near_duplicate_key(a) == near_duplicate_key(b) {
                    similar.push((a.to_string(), b.to_string()));
                }
            }
        }

        Self {
            exact,
            similar,
            before: cleaned.len(),
            after: dedupe_images(&cleaned).len(),
        }
    }

    pub fn has_duplicates(&self) -> bool {
        !self.exact.is_empty() || !self.similar.is_empty()
    }

    /// Entries that would be removed by [`dedupe_images`].
    pub fn removed(&self) -> usize {
        self.before - self.after
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef<'a> {
    Remote(&'a str),
    /// Site-relative path, e.g. `/images/marketplace/truper/X.jpg`.
    Local(&'a str),
    Invalid,
}

pub fn classify_reference(img: &str) -> ImageRef<'_> {
    let img = img.trim();
    if img.starts_with("http://") || img.starts_with("https://") {
        ImageRef::Remote(img)
    } else if img.starts_with('/') && img.len() > 1 {
        ImageRef::Local(img)
    } else {
        ImageRef::Invalid
    }
}

/// Resolve a site-relative path to its file under the public web root.
pub fn local_file(public_dir: &Path, site_path: &str) -> std::path::PathBuf {
    public_dir.join(site_path.trim_start_matches('/'))
}

/// Hosts whose image URLs are accepted without a probe.
pub const TRUSTED_IMAGE_HOSTS: [&str; 3] = ["truper.com", "syscom.mx", "supabase.co"];

/// Whether `url` points at one of [`TRUSTED_IMAGE_HOSTS`] or a subdomain of one.
pub fn is_trusted_host(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    TRUSTED_IMAGE_HOSTS
        .iter()
        .any(|t| host == *t || host.ends_with(&format!(".{t}")))
}

/// Entries that look servable without touching the network: remote URLs
/// as-is, local paths whose file exists.
pub fn valid_images<S: AsRef<str>>(images: &[S], public_dir: &Path) -> Vec<String> {
    images
        .iter()
        .filter_map(|img| match classify_reference(img.as_ref()) {
            ImageRef::Remote(url) => Some(url.to_string()),
            ImageRef::Local(p) if local_file(public_dir, p).is_file() => Some(p.to_string()),
            _ => None,
        })
        .collect()
}

fn local_identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^/]+)\.(?i:jpg|webp|png)$").expect("valid regex"))
}

/// Identifier of a local vendor image: `/images/marketplace/truper/PET-15X.jpg` -> `PET-15X`.
pub fn local_identifier<'a>(img: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = img.trim().strip_prefix(prefix)?;
    local_identifier_re()
        .captures(rest)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Re-point local vendor paths at the remote URL convention.
///
/// Entries outside `prefix`, or whose identifier cannot be read, are kept.
/// Returns `None` when nothing would change.
pub fn local_to_remote<S: AsRef<str>>(
    images: &[S],
    prefix: &str,
    template: &str,
) -> Option<Vec<String>> {
    let mut changed = false;
    let out = images
        .iter()
        .map(|img| {
            let img = img.as_ref();
            match local_identifier(img, prefix) {
                Some(id) => {
                    changed = true;
                    render_template(template, id)
                }
                None => img.to_string(),
            }
        })
        .collect();
    changed.then_some(out)
}

fn title_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{5,6})\b").expect("valid regex"))
}

fn vendor_url_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"imagenes/(\d{5,6})\.jpg").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageMismatch {
    /// The vendor URL carries a different catalog code than the product text.
    CodeMismatch {
        product_code: String,
        image_url: String,
        url_code: String,
    },
    /// Several distinct codes in vendor URLs and none is the product's.
    ConflictingCodes {
        product_code: String,
        url_codes: Vec<String>,
    },
}

impl ImageMismatch {
    pub fn describe(&self) -> String {
        match self {
            ImageMismatch::CodeMismatch {
                product_code,
                image_url,
                url_code,
            } => format!("code {product_code} != {url_code} in {image_url}"),
            ImageMismatch::ConflictingCodes {
                product_code,
                url_codes,
            } => format!(
                "code {product_code} matches none of {}",
                url_codes.join(", ")
            ),
        }
    }
}

/// Wrong-image analysis: compare the numeric code in the product text with
/// the codes embedded in its vendor image URLs.
pub fn mismatched_codes<S: AsRef<str>>(
    title: &str,
    description: Option<&str>,
    images: &[S],
) -> Vec<ImageMismatch> {
    let text = super::clave::product_text(title, description);
    let Some(product_code) = title_code_re()
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut url_codes: Vec<String> = Vec::new();
    for img in images {
        let img = img.as_ref();
        let Some(code) = vendor_url_code_re()
            .captures(img)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        if code != product_code {
            out.push(ImageMismatch::CodeMismatch {
                product_code: product_code.clone(),
                image_url: img.to_string(),
                url_code: code.clone(),
            });
        }
        url_codes.push(code);
    }

    let distinct: HashSet<&String> = url_codes.iter().collect();
    if distinct.len() > 1 && !url_codes.contains(&product_code) {
        out.push(ImageMismatch::ConflictingCodes {
            product_code,
            url_codes,
        });
    }
    out
}

fn generic_vendor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"imagenes/[A-Z]{1,2}\.jpg$").expect("valid regex"))
}

/// Storage bucket the marketplace no longer serves images from.
const RETIRED_STORAGE: &str = "supabase.co/storage/v1/object/public/marketplace-images/";

/// Known-bad references: one- or two-letter vendor codes (`E.jpg`) that
/// got attached to many products, and the retired storage bucket.
pub fn is_wrong_image_url(img: &str) -> bool {
    generic_vendor_re().is_match(img) || img.contains(RETIRED_STORAGE)
}

/// Drop wrong references and duplicates. When nothing usable is left, fall
/// back to the vendor URL for the first identifier in the product text.
pub fn clean_product_images<S: AsRef<str>>(
    images: &[S],
    title: &str,
    description: Option<&str>,
    url_template: &str,
) -> Vec<String> {
    let rebuilt: String;
    let trimmed: Vec<&str> = images
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect();
    let (wrong, mut keep): (Vec<&str>, Vec<&str>) =
        trimmed.into_iter().partition(|img| is_wrong_image_url(img));

    if keep.is_empty() && !wrong.is_empty() && !title.trim().is_empty() {
        let text = super::clave::product_text(title, description);
        let code = super::clave::extract_candidates(&text)
            .into_iter()
            .find(|c| c.kind != super::clave::CodeKind::Numeric4);
        if let Some(c) = code {
            rebuilt = render_template(url_template, &c.lookup_key());
            if !wrong.contains(&rebuilt.as_str()) {
                keep.push(&rebuilt);
            }
        }
    }
    dedupe_images(&keep)
}

/// How often each image is referenced across products (shared-image audit).
pub fn shared_images<'a, I, S>(all: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a [S]>,
    S: AsRef<str> + 'a,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for images in all {
        let unique: HashSet<String> = images
            .iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for img in unique {
            *counts.entry(img).or_default() += 1;
        }
    }
    counts.retain(|_, n| *n > 1);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_IMAGE_URL_TEMPLATE;

    #[test]
    fn generic_codes_and_retired_bucket_are_wrong() {
        assert!(is_wrong_image_url("https://www.truper.com/media/import/imagenes/E.jpg"));
        assert!(is_wrong_image_url(
            "https://abc.supabase.co/storage/v1/object/public/marketplace-images/x.png"
        ));
        assert!(!is_wrong_image_url("https://www.truper.com/media/import/imagenes/PET-15X.jpg"));
    }

    #[test]
    fn cleaning_rebuilds_vendor_url_when_only_wrong_images_remain() {
        let imgs = ["https://www.truper.com/media/import/imagenes/R.jpg"];
        assert_eq!(
            clean_product_images(&imgs, "RMAX-7NX - Rotomartillo", None, DEFAULT_IMAGE_URL_TEMPLATE),
            vec!["https://www.truper.com/media/import/imagenes/RMAX-7NX.jpg"]
        );
        let mixed = ["/a.jpg", "https://www.truper.com/media/import/imagenes/E.jpg", "/a.jpg"];
        assert_eq!(clean_product_images(&mixed, "Pala", None, DEFAULT_IMAGE_URL_TEMPLATE), vec!["/a.jpg"]);
        assert!(clean_product_images(&imgs, "Pala", None, DEFAULT_IMAGE_URL_TEMPLATE).is_empty());
    }

    #[test]
    fn exact_duplicates_are_removed_in_order() {
        assert_eq!(dedupe_images(&["A.jpg", "A.jpg", "B.jpg"]), vec!["A.jpg", "B.jpg"]);
    }

    #[test]
    fn near_duplicates_and_blanks_are_removed() {
        let imgs = [" https://x/My Img.jpg", "", "https://x/my%20img.JPG", "  ", "https://x/b.jpg"];
        assert_eq!(
            dedupe_images(&imgs),
            vec!["https://x/My Img.jpg", "https://x/b.jpg"]
        );
    }

    #[test]
    fn dedupe_is_idempotent() {
        let imgs = ["B", "a", "A", "b ", "c", "a", "C%20"];
        let once = dedupe_images(&imgs);
        assert_eq!(dedupe_images(&once), once);
    }

    #[test]
    fn report_counts_exact_and_similar() {
        let r = DuplicateReport::analyze(&["A.jpg", "a.jpg", "A.jpg", "B.jpg"]);
        assert_eq!(r.exact, vec![("A.jpg".to_string(), 2)]);
        assert_eq!(r.similar.len(), 2);
        assert_eq!((r.before, r.after, r.removed()), (4, 2, 2));
        assert!(!DuplicateReport::analyze(&["x", "y"]).has_duplicates());
    }

    #[test]
    fn local_paths_become_vendor_urls() {
        let prefix = "/images/marketplace/truper/";
        let imgs = [
            "/images/marketplace/truper/PET-15X.jpg",
            "https://cdn.example.com/a.png",
            "/images/marketplace/truper/sub/odd.gif",
        ];
        let out = local_to_remote(&imgs, prefix, DEFAULT_IMAGE_URL_TEMPLATE).unwrap();
        assert_eq!(out[0], "https://www.truper.com/media/import/imagenes/PET-15X.jpg");
        assert_eq!(out[1], imgs[1]);
        assert_eq!(out[2], imgs[2]);
        assert!(local_to_remote(&["https://a/b.jpg"], prefix, DEFAULT_IMAGE_URL_TEMPLATE).is_none());
    }

    #[test]
    fn uppercase_extensions_are_migrated() {
        let prefix = "/images/marketplace/truper/";
        assert_eq!(local_identifier("/images/marketplace/truper/X-1.JPG", prefix), Some("X-1"));
        assert_eq!(local_identifier("/images/marketplace/truper/X-2.WebP", prefix), Some("X-2"));
        let out = local_to_remote(&["/images/marketplace/truper/PET-15X.JPG"], prefix, DEFAULT_IMAGE_URL_TEMPLATE)
            .unwrap();
        assert_eq!(out, vec!["https://www.truper.com/media/import/imagenes/PET-15X.jpg"]);
    }

    #[test]
    fn trusted_hosts_match_on_host_only() {
        assert!(is_trusted_host("https://www.truper.com/media/import/imagenes/A.jpg"));
        assert!(is_trusted_host("https://ftp3.syscom.mx/IMG/img_prod/1.jpg"));
        assert!(is_trusted_host("https://abc.supabase.co/storage/v1/x.png"));
        assert!(!is_trusted_host("https://cdn.example.com/truper.com/a.jpg"));
        assert!(!is_trusted_host("https://nottruper.com/a.jpg"));
        assert!(!is_trusted_host("/images/a.jpg"));
    }

    #[test]
    fn valid_images_checks_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("images/marketplace/truper");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("A.jpg"), b"x").unwrap();

        let imgs = [
            "/images/marketplace/truper/A.jpg",
            "/images/marketplace/truper/missing.jpg",
            "https://x/y.jpg",
            "not-a-path",
        ];
        assert_eq!(
            valid_images(&imgs, dir.path()),
            vec!["/images/marketplace/truper/A.jpg", "https://x/y.jpg"]
        );
    }

    #[test]
    fn wrong_vendor_code_is_reported() {
        let imgs = [
            "https://www.truper.com/media/import/imagenes/100049.jpg",
            "https://www.truper.com/media/import/imagenes/100050.jpg",
        ];
        let issues = mismatched_codes("Pinza 100048", None, &imgs);
        assert_eq!(issues.len(), 3);
        assert!(matches!(issues[2], ImageMismatch::ConflictingCodes { .. }));
        assert!(mismatched_codes("Sin codigo", None, &imgs).is_empty());
        assert!(mismatched_codes("Pinza 100049", None, &imgs[..1]).is_empty());
    }

    #[test]
    fn shared_images_counts_products_not_entries() {
        let a = vec!["x.jpg".to_string(), "x.jpg".to_string()];
        let b = vec!["x.jpg".to_string(), "y.jpg".to_string()];
        let shared = shared_images([a.as_slice(), b.as_slice()]);
        assert_eq!(shared.get("x.jpg"), Some(&2));
        assert!(!shared.contains_key("y.jpg"));
    }
}
