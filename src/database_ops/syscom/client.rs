use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::{fetch_token, TokenCache};
use super::mapping::SyscomProduct;
use crate::config::{SyscomCredentials, SyscomSettings};

/// Items per page when the API omits `paginas`.
const DEFAULT_PAGE_SIZE: usize = 60;
const FIRST_PAGE_ATTEMPTS: u32 = 3;
const PAGE_ATTEMPTS: u32 = 5;
const FIRST_PAGE_BACKOFF: Duration = Duration::from_secs(5);
const PAGE_BACKOFF: Duration = Duration::from_secs(3);
const NON_200_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Default, Deserialize)]
struct CategoryPage {
    #[serde(default)]
    productos: Vec<Value>,
    #[serde(default)]
    paginas: Option<Value>,
    #[serde(default)]
    cantidad: Option<Value>,
}

/// Page count reported by the API; `false`/`null`/missing fall back to the
/// first page's size divided by the usual page length.
pub fn total_pages(paginas: Option<&Value>, first_page_len: usize) -> u32 {
    match paginas.and_then(Value::as_u64) {
        Some(n) if n >= 1 => n.min(u32::MAX as u64) as u32,
        _ => first_page_len.div_ceil(DEFAULT_PAGE_SIZE).max(1) as u32,
    }
}

/// Pages fetched after the first one.
pub fn remaining_pages(total: u32, start_page: u32) -> std::ops::RangeInclusive<u32> {
    start_page.max(2)..=total
}

/// Items that fail to deserialize are skipped and counted.
fn parse_products(raw: Vec<Value>) -> (Vec<SyscomProduct>, usize) {
    let mut bad = 0usize;
    let items = raw
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<SyscomProduct>(v) {
            Ok(p) => Some(p),
            Err(_) => {
                bad += 1;
                None
            }
        })
        .collect();
    (items, bad)
}

pub struct SyscomClient {
    http: Client,
    settings: SyscomSettings,
    creds: SyscomCredentials,
    token: Mutex<TokenCache>,
}

impl SyscomClient {
    pub fn new(settings: SyscomSettings, creds: SyscomCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("building distributor HTTP client")?;
        Ok(Self {
            http,
            settings,
            creds,
            token: Mutex::new(TokenCache::default()),
        })
    }

    /// Client for a local test server: token endpoint at `{base}/oauth/token`,
    /// no delay between requests.
    #[cfg(test)]
    pub(crate) fn against(base: &str) -> Self {
        let settings = SyscomSettings {
            api_base: base.to_string(),
            oauth_url: format!("{base}/oauth/token"),
            rate_delay: Duration::ZERO,
            image_url_template: crate::config::DEFAULT_SYSCOM_IMAGE_URL_TEMPLATE.to_string(),
        };
        let creds = SyscomCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        };
        Self::new(settings, creds).expect("test client")
    }

    pub fn rate_delay(&self) -> Duration {
        self.settings.rate_delay
    }

    async fn bearer(&self) -> Result<String> {
        let mut cache = self.token.lock().await;
        if let Some(t) = cache.valid_at(Instant::now()) {
            return Ok(t.to_string());
        }
        let issued_at = Instant::now();
        let resp = fetch_token(&self.http, &self.settings.oauth_url, &self.creds).await?;
        let token = resp.access_token.clone();
        cache.store(resp.access_token, Duration::from_secs(resp.expires_in), issued_at);
        Ok(token)
    }

    async fn get_page(
        &self,
        categoria: &str,
        pagina: Option<u32>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/productos", self.settings.api_base);
        let token = self.bearer().await?;
        let mut req = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .query(&[("categoria", categoria)]);
        if let Some(p) = pagina {
            req = req.query(&[("pagina", p)]);
        }
        req.send()
            .await
            .with_context(|| format!("requesting category {categoria}"))
    }

    /// Every product of one distributor category.
    ///
    /// The first page is tried three times with a 5 s x attempt back-off on
    /// transport errors; any failure there yields an empty list. Later pages
    /// get five attempts each and are skipped when exhausted. Only a failed
    /// token request is returned as an error.
    pub async fn category_products(
        &self,
        categoria: &str,
        start_page: u32,
    ) -> Result<Vec<SyscomProduct>> {
        // fail fast on bad credentials
        self.bearer().await?;

        let mut first = None;
        for attempt in 1..=FIRST_PAGE_ATTEMPTS {
            match self.get_page(categoria, None).await {
                Ok(resp) => {
                    first = Some(resp);
                    break;
                }
                Err(e) if attempt < FIRST_PAGE_ATTEMPTS => {
                    let wait = FIRST_PAGE_BACKOFF * attempt;
                    warn!(target: "syscom", categoria, attempt, error = %e, wait_secs = wait.as_secs(), "first page failed; retrying");
                    sleep(wait).await;
                }
                Err(e) => {
                    warn!(target: "syscom", categoria, error = %e, "first page failed after retries");
                }
            }
        }
        let Some(first) = first else {
            return Ok(Vec::new());
        };
        if first.status() != StatusCode::OK {
            let status = first.status();
            let body = first.text().await.unwrap_or_default();
            warn!(target: "syscom", categoria, status = status.as_u16(), body = %body.chars().take(200).collect::<String>(), "category request rejected");
            return Ok(Vec::new());
        }
        let page: CategoryPage = match first.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "syscom", categoria, error = %e, "first page body unreadable");
                return Ok(Vec::new());
            }
        };

        let first_len = page.productos.len();
        let pages = total_pages(page.paginas.as_ref(), first_len);
        info!(target: "syscom", categoria, total = ?page.cantidad, pages, first_page = first_len, "category listing");

        let (mut all, mut bad) = parse_products(page.productos);
        for pagina in remaining_pages(pages, start_page) {
            sleep(self.settings.rate_delay).await;
            match self.fetch_page_with_retry(categoria, pagina).await {
                Some(raw) => {
                    let (items, b) = parse_products(raw);
                    debug!(target: "syscom", categoria, pagina, items = items.len(), "page fetched");
                    bad += b;
                    all.extend(items);
                }
                None => {
                    warn!(target: "syscom", categoria, pagina, pages, "page skipped after retries");
                }
            }
        }
        if bad > 0 {
            warn!(target: "syscom", categoria, bad, "items skipped (unparseable)");
        }
        info!(target: "syscom", categoria, products = all.len(), "category fetched");
        Ok(all)
    }

    async fn fetch_page_with_retry(&self, categoria: &str, pagina: u32) -> Option<Vec<Value>> {
        for attempt in 1..=PAGE_ATTEMPTS {
            let last = attempt == PAGE_ATTEMPTS;
            match self.get_page(categoria, Some(pagina)).await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    match resp.json::<CategoryPage>().await {
                        Ok(p) => return Some(p.productos),
                        Err(e) => {
                            warn!(target: "syscom", categoria, pagina, error = %e, "page body unreadable");
                            if !last {
                                sleep(NON_200_WAIT).await;
                            }
                        }
                    }
                }
                Ok(resp) => {
                    warn!(target: "syscom", categoria, pagina, attempt, status = resp.status().as_u16(), "page request rejected");
                    if !last {
                        sleep(NON_200_WAIT).await;
                    }
                }
                Err(e) => {
                    warn!(target: "syscom", categoria, pagina, attempt, error = %e, "page request failed");
                    if !last {
                        sleep(PAGE_BACKOFF * attempt).await;
                    }
                }
            }
        }
        None
    }

    /// Single product detail; `None` when the API does not return it.
    pub async fn product_detail(&self, producto_id: &str) -> Result<Option<SyscomProduct>> {
        let token = self.bearer().await?;
        let url = format!("{}/productos/{}", self.settings.api_base, producto_id);
        let resp = match self
            .http
            .get(&url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(30))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(target: "syscom", producto_id, error = %e, "detail request failed");
                return Ok(None);
            }
        };
        if resp.status() != StatusCode::OK {
            debug!(target: "syscom", producto_id, status = resp.status().as_u16(), "detail not available");
            return Ok(None);
        }
        Ok(resp.json::<SyscomProduct>().await.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn page_count_falls_back_when_missing() {
        assert_eq!(total_pages(Some(&json!(7)), 60), 7);
        assert_eq!(total_pages(Some(&json!(false)), 61), 2);
        assert_eq!(total_pages(None, 0), 1);
        assert_eq!(total_pages(Some(&Value::Null), 60), 1);
    }

    #[test]
    fn later_pages_start_at_two_or_resume_point() {
        assert_eq!(remaining_pages(5, 1).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!(remaining_pages(5, 4).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(remaining_pages(1, 1).count(), 0);
    }

    async fn grant_tokens(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn unreadable_first_page_yields_empty_category() {
        let server = MockServer::start().await;
        grant_tokens(&server).await;
        Mock::given(method("GET"))
            .and(path("/productos"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>oops</html>", "text/html"))
            .mount(&server)
            .await;

        let client = SyscomClient::against(&server.uri());
        assert!(client.category_products("22", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn detail_reads_price_and_token_is_reused() {
        let server = MockServer::start().await;
        grant_tokens(&server).await;
        Mock::given(method("GET"))
            .and(path("/productos/77"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"producto_id": 77, "precios": {"precio_especial": "90.5", "precio_lista": "100"}}),
            ))
            .mount(&server)
            .await;

        let client = SyscomClient::against(&server.uri());
        let detail = client.product_detail("77").await.unwrap().unwrap();
        assert_eq!(detail.producto_id.as_deref(), Some("77"));
        assert!(client.product_detail("78").await.unwrap().is_none());
        let token_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/oauth/token")
            .count();
        assert_eq!(token_calls, 1);
    }

    #[tokio::test]
    async fn rejected_token_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = SyscomClient::against(&server.uri());
        assert!(client.product_detail("1").await.is_err());
        assert!(client.category_products("22", 1).await.is_err());
    }

    #[test]
    fn unparseable_items_are_counted() {
        let (items, bad) = parse_products(vec![
            json!({"producto_id": 1, "titulo": "a"}),
            json!("not an object"),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(bad, 1);
    }
}
