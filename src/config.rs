//! Run configuration resolved from the environment (see `util::env`).
//!
//! Every value has a default so offline commands work without a dotfile;
//! credentials are only demanded by the commands that talk to the hosted
//! database or the distributor API.
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::env::{env_opt, env_parse, env_req};

pub const DEFAULT_IMAGE_URL_TEMPLATE: &str =
    "https://www.truper.com/media/import/imagenes/{code}.jpg";
pub const DEFAULT_SYSCOM_IMAGE_URL_TEMPLATE: &str =
    "https://ftp3.syscom.mx/IMG/img_prod/{code}.jpg";
pub const DEFAULT_LOCAL_PREFIX: &str = "/images/marketplace/truper/";
pub const DEFAULT_CONTACT_PHONE: &str = "5636741156";
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Upper bound for any worker pool regardless of configuration.
const MAX_WORKERS: usize = 32;

#[derive(Debug, Clone)]
pub struct UpkeepConfig {
    pub catalog_csv: PathBuf,
    pub public_dir: PathBuf,
    pub local_prefix: String,
    pub image_url_template: String,
    pub image_check_workers: usize,
    pub download_workers: usize,
    pub http_timeout: Duration,
    pub contact_phone: String,
    pub usd_mxn_rate: f64,
    pub syscom: SyscomSettings,
}

#[derive(Debug, Clone)]
pub struct SyscomSettings {
    pub api_base: String,
    pub oauth_url: String,
    pub rate_delay: Duration,
    /// Product image URL by distributor id, used when the API lists none.
    pub image_url_template: String,
}

/// Distributor client credentials; only loaded by commands that need them.
#[derive(Clone)]
pub struct SyscomCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for SyscomCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyscomCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl SyscomCredentials {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client_id: env_req("SYSCOM_CLIENT_ID")?,
            client_secret: env_req("SYSCOM_CLIENT_SECRET")?,
        })
    }
}

impl Default for UpkeepConfig {
    fn default() -> Self {
        Self {
            catalog_csv: PathBuf::from("data/truper_catalog_full.csv"),
            public_dir: PathBuf::from("public"),
            local_prefix: DEFAULT_LOCAL_PREFIX.to_string(),
            image_url_template: DEFAULT_IMAGE_URL_TEMPLATE.to_string(),
            image_check_workers: 10,
            download_workers: 20,
            http_timeout: Duration::from_secs(5),
            contact_phone: DEFAULT_CONTACT_PHONE.to_string(),
            usd_mxn_rate: 17.5,
            syscom: SyscomSettings {
                api_base: "https://developers.syscom.mx/api/v1".to_string(),
                oauth_url: "https://developers.syscom.mx/oauth/token".to_string(),
                rate_delay: Duration::from_millis(1100),
                image_url_template: DEFAULT_SYSCOM_IMAGE_URL_TEMPLATE.to_string(),
            },
        }
    }
}

impl UpkeepConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            catalog_csv: env_opt("CATALOG_CSV").map(PathBuf::from).unwrap_or(d.catalog_csv),
            public_dir: env_opt("PUBLIC_DIR").map(PathBuf::from).unwrap_or(d.public_dir),
            local_prefix: env_opt("LOCAL_IMAGE_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(d.local_prefix),
            image_url_template: env_opt("VENDOR_IMAGE_URL_TEMPLATE")
                .unwrap_or(d.image_url_template),
            image_check_workers: clamp_workers(env_parse(
                "IMAGE_CHECK_WORKERS",
                d.image_check_workers,
            )),
            download_workers: clamp_workers(env_parse("DOWNLOAD_WORKERS", d.download_workers)),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 5u64).max(1)),
            contact_phone: env_opt("CATALOG_CONTACT_PHONE").unwrap_or(d.contact_phone),
            usd_mxn_rate: env_parse("USD_MXN_RATE", d.usd_mxn_rate),
            syscom: SyscomSettings {
                api_base: env_opt("SYSCOM_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or(d.syscom.api_base),
                oauth_url: env_opt("SYSCOM_OAUTH_URL").unwrap_or(d.syscom.oauth_url),
                rate_delay: Duration::from_millis(env_parse("SYSCOM_RATE_DELAY_MS", 1100u64)),
                image_url_template: env_opt("SYSCOM_IMAGE_URL_TEMPLATE")
                    .unwrap_or(d.syscom.image_url_template),
            },
        }
    }

    /// Directory on disk holding the vendor images (`{public}/{prefix}`).
    pub fn images_dir(&self) -> PathBuf {
        self.public_dir.join(self.local_prefix.trim_matches('/'))
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(n) = workers {
            self.image_check_workers = clamp_workers(n);
            self.download_workers = clamp_workers(n);
        }
        self
    }

    pub fn with_catalog_csv(mut self, path: Option<&Path>) -> Self {
        if let Some(p) = path {
            self.catalog_csv = p.to_path_buf();
        }
        self
    }
}

/// Substitute `{code}` (or the legacy `{codigo}` / `{identifier}`) in a URL template.
pub fn render_template(template: &str, code: &str) -> String {
    template
        .replace("{code}", code)
        .replace("{codigo}", code)
        .replace("{identifier}", code)
}

fn normalize_prefix(raw: &str) -> String {
    format!("/{}/", raw.trim_matches('/'))
}

fn clamp_workers(n: usize) -> usize {
    n.clamp(1, MAX_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_accepts_legacy_placeholders() {
        assert_eq!(
            render_template(DEFAULT_IMAGE_URL_TEMPLATE, "RMAX-7NX"),
            "https://www.truper.com/media/import/imagenes/RMAX-7NX.jpg"
        );
        assert_eq!(render_template("https://x/{codigo}.jpg", "100048"), "https://x/100048.jpg");
    }

    #[test]
    fn images_dir_sits_under_public() {
        let cfg = UpkeepConfig::default();
        assert_eq!(cfg.images_dir(), PathBuf::from("public/images/marketplace/truper"));
    }

    #[test]
    fn prefix_and_workers_are_normalized() {
        assert_eq!(normalize_prefix("images/x"), "/images/x/");
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(500), MAX_WORKERS);
        let cfg = UpkeepConfig::default().with_workers(Some(5));
        assert_eq!(cfg.download_workers, 5);
    }
}
