use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;

use crate::clients::cookie_jar::CookieJar;
use crate::config::PanelConfig;
use crate::error::{PanelError, PanelResult};

/// How a request presents itself to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Page navigation and form posts (login, account page).
    Page,
    /// AJAX-style API calls; the panel routes these by the XHR headers.
    Xhr,
}

/// One HTTP client and one cookie jar serving both call profiles.
#[derive(Debug, Clone)]
pub struct Transport {
    base: String,
    http: reqwest::Client,
    xhr_headers: HeaderMap,
    jar: CookieJar,
}

impl Transport {
    pub fn new(cfg: &PanelConfig) -> PanelResult<Self> {
        Self::with_jar(cfg, CookieJar::open(&cfg.cookie_path))
    }

    pub fn with_jar(cfg: &PanelConfig, jar: CookieJar) -> PanelResult<Self> {
        let base = cfg.base().to_string();
        let http = reqwest::Client::builder()
            .cookie_provider(jar.provider())
            .timeout(cfg.request_timeout())
            .connect_timeout(cfg.connect_timeout())
            .build()?;

        let mut xhr_headers = HeaderMap::new();
        xhr_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        xhr_headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        xhr_headers.insert(ORIGIN, header_value(&base)?);
        xhr_headers.insert(
            REFERER,
            header_value(&format!("{base}{}", cfg.referer_path))?,
        );

        Ok(Self {
            base,
            http,
            xhr_headers,
            jar,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn get(&self, profile: Profile, path: &str) -> PanelResult<Response> {
        self.send(profile, self.request(profile, Method::GET, path))
            .await
    }

    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> PanelResult<Response> {
        let req = self.request(Profile::Page, Method::POST, path).form(form);
        self.send(Profile::Page, req).await
    }

    pub async fn post_json(
        &self,
        profile: Profile,
        path: &str,
        body: Option<&Value>,
    ) -> PanelResult<Response> {
        let mut req = self.request(profile, Method::POST, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(profile, req).await
    }

    fn request(&self, profile: Profile, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match profile {
            Profile::Page => req,
            Profile::Xhr => req.headers(self.xhr_headers.clone()),
        }
    }

    /// Sends and persists whatever cookies the round-trip produced. A failed
    /// jar write is logged; the in-memory session stays usable.
    async fn send(&self, profile: Profile, req: RequestBuilder) -> PanelResult<Response> {
        let result = req.send().await;
        if let Err(err) = self.persist_jar().await {
            tracing::warn!(
                target: "transport",
                path = %self.jar.path().display(),
                error = %err,
                "cookie jar save failed"
            );
        }

        let resp = result.map_err(|err| {
            tracing::debug!(
                target: "transport",
                ?profile,
                timeout = err.is_timeout(),
                error = %err,
                "panel request failed"
            );
            PanelError::Http(err)
        })?;
        Ok(resp)
    }

    async fn persist_jar(&self) -> PanelResult<()> {
        let jar = self.jar.clone();
        tokio::task::spawn_blocking(move || jar.save())
            .await
            .map_err(|e| PanelError::Store(format!("cookie jar save task failed: {e}")))?
    }
}

fn header_value(raw: &str) -> PanelResult<HeaderValue> {
    HeaderValue::from_str(raw)
        .map_err(|e| PanelError::Config(format!("invalid header value {raw}: {e}")))
}
