//! Decide which image reference a product should carry.
//!
//! Resolution walks a fixed fallback chain, cheapest check first:
//!
//! 1. an image already assigned to the product that is still valid
//!    (known vendor hosts are trusted, other hosts are probed),
//! 2. a file in the local vendor folder named after the clave or código,
//! 3. the vendor's remote URL convention,
//! 4. downloading that URL into the local folder (only when enabled).
//!
//! Network failures never surface as errors here: a timeout or a non-200
//! response means "not found" and the next key or step is tried.
use anyhow::{Context, Result};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::index::{CatalogIndex, CatalogRecord};
use crate::config::{render_template, UpkeepConfig, BROWSER_USER_AGENT};
use crate::normalization::clave::{extract_candidates, product_text, Candidate, CodeKind};
use crate::normalization::images::{classify_reference, is_trusted_host, local_file, ImageRef};

/// Result of probing one image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    Status(u16),
    NotImage(String),
    Timeout,
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }

    /// Short label for error histograms.
    pub fn label(&self) -> String {
        match self {
            ProbeOutcome::Ok => "ok".to_string(),
            ProbeOutcome::Status(code) => format!("HTTP {code}"),
            ProbeOutcome::NotImage(ct) => format!("not an image ({ct})"),
            ProbeOutcome::Timeout => "timeout".to_string(),
            ProbeOutcome::Failed(msg) => msg.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait ImageProbe: Send + Sync {
    /// HTTP 200 with an `image/*` content type counts as OK.
    async fn check(&self, url: &str) -> ProbeOutcome;
    /// Fetch `url` into `dest`; `Ok` only when the file was written.
    async fn download(&self, url: &str, dest: &Path) -> ProbeOutcome;
}

/// [`ImageProbe`] over reqwest with a browser user agent.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
}

fn is_image(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().starts_with("image/")
}

fn classify_error(e: &reqwest::Error) -> ProbeOutcome {
    if e.is_timeout() {
        ProbeOutcome::Timeout
    } else if e.is_connect() {
        ProbeOutcome::Failed("connection error".to_string())
    } else {
        ProbeOutcome::Failed(e.to_string().chars().take(50).collect())
    }
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    async fn fetch_status(&self, url: &str, head: bool) -> Result<(StatusCode, String), ProbeOutcome> {
        let req = if head {
            self.client.head(url)
        } else {
            self.client.get(url)
        };
        let resp = req
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;
        let ct = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok((resp.status(), ct))
    }
}

#[async_trait::async_trait]
impl ImageProbe for HttpProbe {
    async fn check(&self, url: &str) -> ProbeOutcome {
        let mut res = self.fetch_status(url, true).await;
        // some hosts reject HEAD outright
        if matches!(res, Ok((StatusCode::METHOD_NOT_ALLOWED, _))) {
            res = self.fetch_status(url, false).await;
        }
        match res {
            Ok((StatusCode::OK, ct)) if is_image(&ct) => ProbeOutcome::Ok,
            Ok((StatusCode::OK, ct)) => ProbeOutcome::NotImage(ct),
            Ok((status, _)) => ProbeOutcome::Status(status.as_u16()),
            Err(outcome) => outcome,
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> ProbeOutcome {
        let resp = match self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
        {
            Ok(r) if r.status() == StatusCode::OK => r,
            Ok(r) => {
                debug!(target: "resolver", url, status = r.status().as_u16(), "download not found");
                return ProbeOutcome::Status(r.status().as_u16());
            }
            Err(e) => {
                debug!(target: "resolver", url, error = %e, "download failed");
                return classify_error(&e);
            }
        };
        let ct = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_image(&ct) {
            return ProbeOutcome::NotImage(ct);
        }
        let bytes = match resp.bytes().await {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => return ProbeOutcome::Failed("empty body".to_string()),
            Err(e) => return classify_error(&e),
        };
        match write_atomically(dest, &bytes).await {
            Ok(()) => ProbeOutcome::Ok,
            Err(e) => {
                debug!(target: "resolver", dest = %dest.display(), error = %e, "could not store image");
                ProbeOutcome::Failed(format!("write error: {e}"))
            }
        }
    }
}

/// Write via a sibling temp file and rename so a partial download never
/// looks like a cached image.
pub async fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("renaming into {}", dest.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Probe every remote URL (existing and constructed) before accepting
    /// it, trusted vendor hosts included.
    pub verify_remote: bool,
    /// Cache the vendor image locally instead of pointing at the remote URL.
    pub download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Existing,
    Local,
    Remote,
    Downloaded,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Existing => "existing",
            ResolutionSource::Local => "local",
            ResolutionSource::Remote => "remote",
            ResolutionSource::Downloaded => "downloaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub reference: String,
    pub source: ResolutionSource,
}

pub struct ImageResolver<P> {
    probe: P,
    public_dir: PathBuf,
    images_dir: PathBuf,
    local_prefix: String,
    url_template: String,
    policy: ResolvePolicy,
}

/// Keys to probe for a product: the record's clave then código, or the raw
/// candidates when the catalog has no entry.
pub fn resolution_keys(record: Option<&CatalogRecord>, candidates: &[Candidate]) -> Vec<String> {
    let mut keys: Vec<String> = match record {
        Some(r) => r.clave_key().into_iter().chain([r.codigo.clone()]).collect(),
        None => candidates
            .iter()
            .filter(|c| c.kind != CodeKind::Numeric4)
            .map(Candidate::lookup_key)
            .collect(),
    };
    let mut seen = std::collections::HashSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

impl<P: ImageProbe> ImageResolver<P> {
    pub fn new(probe: P, cfg: &UpkeepConfig, policy: ResolvePolicy) -> Self {
        Self {
            probe,
            public_dir: cfg.public_dir.clone(),
            images_dir: cfg.images_dir(),
            local_prefix: cfg.local_prefix.clone(),
            url_template: cfg.image_url_template.clone(),
            policy,
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// First assigned image that can still be served. Local paths need their
    /// file on disk; remote URLs on a trusted vendor host are taken as-is
    /// unless `verify_remote`, every other remote URL is probed.
    pub async fn usable_existing<S: AsRef<str>>(&self, existing: &[S]) -> Option<String> {
        for img in existing {
            match classify_reference(img.as_ref()) {
                ImageRef::Local(p) if local_file(&self.public_dir, p).is_file() => {
                    return Some(p.to_string())
                }
                ImageRef::Remote(url) => {
                    if !self.policy.verify_remote && is_trusted_host(url) {
                        return Some(url.to_string());
                    }
                    let outcome = self.probe.check(url).await;
                    if outcome.is_ok() {
                        return Some(url.to_string());
                    }
                    debug!(target: "resolver", url, outcome = %outcome.label(), "assigned image not usable");
                }
                _ => {}
            }
        }
        None
    }

    fn local_hit(&self, key: &str) -> Option<String> {
        ["jpg", "webp"].iter().find_map(|ext| {
            let name = format!("{key}.{ext}");
            self.images_dir
                .join(&name)
                .is_file()
                .then(|| format!("{}{}", self.local_prefix, name))
        })
    }

    /// Walk the fallback chain for one product. `None` means no usable image.
    pub async fn resolve<S: AsRef<str>>(&self, existing: &[S], keys: &[String]) -> Option<Resolution> {
        let found = |reference: String, source| Some(Resolution { reference, source });

        if let Some(r) = self.usable_existing(existing).await {
            return found(r, ResolutionSource::Existing);
        }
        for key in keys {
            if let Some(p) = self.local_hit(key) {
                return found(p, ResolutionSource::Local);
            }
        }
        for key in keys {
            let url = render_template(&self.url_template, key);
            if self.policy.download {
                let name = format!("{key}.jpg");
                if self.probe.download(&url, &self.images_dir.join(&name)).await.is_ok() {
                    debug!(target: "resolver", key = %key, url = %url, "image cached locally");
                    return found(format!("{}{}", self.local_prefix, name), ResolutionSource::Downloaded);
                }
            } else if !self.policy.verify_remote {
                return found(url, ResolutionSource::Remote);
            } else {
                let outcome = self.probe.check(&url).await;
                if outcome.is_ok() {
                    return found(url, ResolutionSource::Remote);
                }
                debug!(target: "resolver", key = %key, outcome = %outcome.label(), "remote image not usable");
            }
        }
        None
    }

    /// Extract identifiers from the product text, look them up in the catalog
    /// (keyword match as a last resort) and resolve.
    pub async fn resolve_text<S: AsRef<str>>(
        &self,
        title: &str,
        description: Option<&str>,
        existing: &[S],
        index: &CatalogIndex,
    ) -> Option<Resolution> {
        let text = product_text(title, description);
        let candidates = extract_candidates(&text);
        let record = index
            .find_in_text(&text)
            .map(|(_, r)| r)
            .or_else(|| index.match_by_keywords(&text));
        let keys = resolution_keys(record, &candidates);
        self.resolve(existing, &keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProbe {
        ok: HashSet<String>,
        checked: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn with_ok(urls: &[&str]) -> Self {
            Self {
                ok: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl ImageProbe for FakeProbe {
        async fn check(&self, url: &str) -> ProbeOutcome {
            self.checked.lock().unwrap().push(url.to_string());
            if self.ok.contains(url) {
                ProbeOutcome::Ok
            } else {
                ProbeOutcome::Status(404)
            }
        }

        async fn download(&self, url: &str, dest: &Path) -> ProbeOutcome {
            if !self.ok.contains(url) {
                return ProbeOutcome::Status(404);
            }
            match write_atomically(dest, b"jpeg").await {
                Ok(()) => ProbeOutcome::Ok,
                Err(e) => ProbeOutcome::Failed(e.to_string()),
            }
        }
    }

    const CSV: &str = "Lista\nCódigo,Clave,Descripción\n100048,RMAX-7NX,Rotomartillo SDS Max\n";
    const TITLE: &str = "RMAX-7NX - Rotomartillo SDS Max 6kg";
    const REMOTE: &str = "https://www.truper.com/media/import/imagenes/RMAX-7NX.jpg";

    fn cfg(public: &Path) -> UpkeepConfig {
        UpkeepConfig {
            public_dir: public.to_path_buf(),
            ..UpkeepConfig::default()
        }
    }

    const NONE: &[&str] = &[];

    #[tokio::test]
    async fn local_file_named_after_clave_wins() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        std::fs::create_dir_all(c.images_dir()).unwrap();
        std::fs::write(c.images_dir().join("RMAX-7NX.jpg"), b"x").unwrap();

        let index = CatalogIndex::from_csv_text(CSV);
        let r = ImageResolver::new(FakeProbe::default(), &c, ResolvePolicy::default());
        let res = r.resolve_text(TITLE, None, NONE, &index).await.unwrap();
        assert_eq!(res.reference, "/images/marketplace/truper/RMAX-7NX.jpg");
        assert_eq!(res.source, ResolutionSource::Local);
    }

    #[tokio::test]
    async fn falls_back_to_constructed_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let index = CatalogIndex::from_csv_text(CSV);
        let r = ImageResolver::new(FakeProbe::default(), &cfg(dir.path()), ResolvePolicy::default());
        let res = r.resolve_text(TITLE, None, NONE, &index).await.unwrap();
        assert_eq!(res.reference, REMOTE);
        assert_eq!(res.source, ResolutionSource::Remote);
    }

    #[tokio::test]
    async fn verified_remote_tries_codigo_after_clave() {
        let dir = tempfile::tempdir().unwrap();
        let index = CatalogIndex::from_csv_text(CSV);
        let by_code = "https://www.truper.com/media/import/imagenes/100048.jpg";
        let policy = ResolvePolicy { verify_remote: true, download: false };
        let r = ImageResolver::new(FakeProbe::with_ok(&[by_code]), &cfg(dir.path()), policy);
        let res = r.resolve_text(TITLE, None, NONE, &index).await.unwrap();
        assert_eq!(res.reference, by_code);
        assert_eq!(*r.probe().checked.lock().unwrap(), vec![REMOTE.to_string(), by_code.to_string()]);

        let r = ImageResolver::new(FakeProbe::default(), &cfg(dir.path()), policy);
        assert!(r.resolve_text(TITLE, None, NONE, &index).await.is_none());
    }

    #[tokio::test]
    async fn trusted_existing_image_is_kept_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let r = ImageResolver::new(FakeProbe::default(), &c, ResolvePolicy::default());
        let existing = ["/images/missing.jpg", REMOTE];
        let res = r.resolve(&existing, &["X".to_string()]).await.unwrap();
        assert_eq!(res.source, ResolutionSource::Existing);
        assert_eq!(res.reference, REMOTE);
        assert!(r.probe().checked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_hosts_are_checked_before_being_kept() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let good = "https://cdn.example.com/a.jpg";
        let r = ImageResolver::new(FakeProbe::with_ok(&[good]), &c, ResolvePolicy::default());
        assert_eq!(r.usable_existing(&[good]).await.as_deref(), Some(good));
        assert_eq!(r.usable_existing(&["https://cdn.example.com/dead.jpg"]).await, None);
        assert_eq!(r.probe().checked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn verify_checks_trusted_hosts_and_replaces_dead_image() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        std::fs::create_dir_all(c.images_dir()).unwrap();
        std::fs::write(c.images_dir().join("RMAX-7NX.jpg"), b"x").unwrap();
        let dead = "https://www.truper.com/media/import/imagenes/DEAD-404.jpg";
        let policy = ResolvePolicy { verify_remote: true, download: false };
        let r = ImageResolver::new(FakeProbe::default(), &c, policy);

        assert_eq!(r.usable_existing(&[dead]).await, None);
        let index = CatalogIndex::from_csv_text(CSV);
        let res = r.resolve_text(TITLE, None, &[dead], &index).await.unwrap();
        assert_eq!(res.source, ResolutionSource::Local);
        assert_eq!(res.reference, "/images/marketplace/truper/RMAX-7NX.jpg");
    }

    #[tokio::test]
    async fn download_caches_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let index = CatalogIndex::from_csv_text(CSV);
        let policy = ResolvePolicy { verify_remote: false, download: true };
        let r = ImageResolver::new(FakeProbe::with_ok(&[REMOTE]), &c, policy);
        let res = r.resolve_text(TITLE, None, NONE, &index).await.unwrap();
        assert_eq!(res.source, ResolutionSource::Downloaded);
        assert_eq!(res.reference, "/images/marketplace/truper/RMAX-7NX.jpg");
        assert!(c.images_dir().join("RMAX-7NX.jpg").is_file());
        assert!(!c.images_dir().join("RMAX-7NX.part").exists());
    }

    mod http {
        use super::super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn short_timeout() -> HttpProbe {
            HttpProbe::new(Duration::from_millis(300)).unwrap()
        }

        #[tokio::test]
        async fn head_rejected_falls_back_to_get() {
            let server = MockServer::start().await;
            Mock::given(method("HEAD"))
                .and(path("/a.jpg"))
                .respond_with(ResponseTemplate::new(405))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/a.jpg"))
                .respond_with(ResponseTemplate::new(200).set_body_raw(b"jpeg".to_vec(), "image/jpeg"))
                .mount(&server)
                .await;

            let outcome = short_timeout().check(&format!("{}/a.jpg", server.uri())).await;
            assert_eq!(outcome, ProbeOutcome::Ok);
            let methods: Vec<String> = server
                .received_requests()
                .await
                .unwrap()
                .iter()
                .map(|r| r.method.to_string())
                .collect();
            assert_eq!(methods, vec!["HEAD", "GET"]);
        }

        #[tokio::test]
        async fn status_and_content_type_decide_the_outcome() {
            let server = MockServer::start().await;
            Mock::given(method("HEAD"))
                .and(path("/page.jpg"))
                .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
                .mount(&server)
                .await;
            Mock::given(method("HEAD"))
                .and(path("/ok.png"))
                .respond_with(ResponseTemplate::new(200).insert_header("content-type", "IMAGE/PNG"))
                .mount(&server)
                .await;

            let p = short_timeout();
            let base = server.uri();
            assert_eq!(
                p.check(&format!("{base}/page.jpg")).await,
                ProbeOutcome::NotImage("text/html".to_string())
            );
            assert_eq!(p.check(&format!("{base}/ok.png")).await, ProbeOutcome::Ok);
            assert_eq!(p.check(&format!("{base}/missing.jpg")).await, ProbeOutcome::Status(404));
        }

        #[tokio::test]
        async fn slow_host_times_out() {
            let server = MockServer::start().await;
            Mock::given(method("HEAD"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/jpeg")
                        .set_delay(Duration::from_secs(3)),
                )
                .mount(&server)
                .await;
            let outcome = short_timeout().check(&format!("{}/slow.jpg", server.uri())).await;
            assert_eq!(outcome, ProbeOutcome::Timeout);
        }

        #[tokio::test]
        async fn download_writes_images_only() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/img.jpg"))
                .respond_with(ResponseTemplate::new(200).set_body_raw(b"jpeg-bytes".to_vec(), "image/jpeg"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/html.jpg"))
                .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let p = short_timeout();
            let base = server.uri();

            let good = dir.path().join("GOOD.jpg");
            assert_eq!(p.download(&format!("{base}/img.jpg"), &good).await, ProbeOutcome::Ok);
            assert_eq!(std::fs::read(&good).unwrap(), b"jpeg-bytes");
            assert!(!dir.path().join("GOOD.part").exists());

            let page = dir.path().join("PAGE.jpg");
            assert!(matches!(
                p.download(&format!("{base}/html.jpg"), &page).await,
                ProbeOutcome::NotImage(_)
            ));
            assert!(!page.exists());

            let gone = dir.path().join("GONE.jpg");
            assert_eq!(p.download(&format!("{base}/gone.jpg"), &gone).await, ProbeOutcome::Status(404));
            assert!(!gone.exists());
        }
    }

    #[test]
    fn keys_without_catalog_record_come_from_candidates() {
        let cands = extract_candidates("Llave TALI20P 1234 100048");
        assert_eq!(resolution_keys(None, &cands), vec!["TALI-20P", "100048"]);
        let rec = CatalogRecord::new("100048", Some("rmax7nx"), None);
        assert_eq!(resolution_keys(Some(&rec), &cands), vec!["RMAX-7NX", "100048"]);
    }
}
