use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::auth::{Access, AuthGate, AuthState, Authenticator};
use crate::clients::transport::{Profile, Transport};
use crate::config::AppConfig;
use crate::error::{PanelError, PanelResult};
use crate::ops::metrics::Metrics;
use crate::orders::{parse_order_list, Order, OrderStatus};
use crate::store::{ConfigStore, PanelSettings};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Result of a façade call that made it past the auth check.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    /// Login is turned off; nothing was sent.
    Disabled,
}

impl<T> Outcome<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Disabled => None,
        }
    }
}

impl<T: Default> Outcome<T> {
    /// Collapses `Disabled` into the empty value (`[]`, `false`).
    pub fn into_value(self) -> T {
        self.done().unwrap_or_default()
    }
}

enum Reply {
    Body(String),
    Unauthorized(StatusCode),
}

/// Order API client for the panel.
///
/// Every call runs the shared ensure-authenticated routine first. A 401/403
/// answer triggers one forced re-login and one resend; a second rejection
/// is returned as [`PanelError::Unauthorized`].
#[derive(Clone)]
pub struct PanelClient {
    inner: Arc<PanelInner>,
}

struct PanelInner {
    transport: Arc<Transport>,
    gate: AuthGate,
    settings: PanelSettings,
    metrics: Metrics,
}

impl std::fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelClient")
            .field("base", &self.inner.transport.base())
            .field("auth_state", &self.inner.gate.last_state())
            .finish()
    }
}

impl PanelClient {
    /// Builds the client without touching the network.
    pub fn new(cfg: &AppConfig, store: Arc<dyn ConfigStore>, metrics: Metrics) -> PanelResult<Self> {
        let transport = Arc::new(Transport::new(&cfg.panel)?);
        let settings = PanelSettings::new(store, cfg.store.keys.clone());
        let authenticator = Authenticator::new(transport.clone(), settings.clone(), metrics.clone());
        let gate = AuthGate::new(authenticator, settings.clone(), &cfg.auth, metrics.clone());

        Ok(Self {
            inner: Arc::new(PanelInner {
                transport,
                gate,
                settings,
                metrics,
            }),
        })
    }

    /// Builds the client and runs the initial auth check so
    /// [`last_auth_state`](Self::last_auth_state) is meaningful right away.
    /// Auth failures are logged, not returned; the next call retries.
    pub async fn connect(
        cfg: &AppConfig,
        store: Arc<dyn ConfigStore>,
        metrics: Metrics,
    ) -> PanelResult<Self> {
        let client = Self::new(cfg, store, metrics)?;
        match client.inner.gate.ensure_authenticated().await {
            Ok(_) => {}
            Err(err @ PanelError::Store(_)) => return Err(err),
            Err(err) => {
                tracing::warn!(
                    target: "panel",
                    error = %err,
                    state = %client.last_auth_state(),
                    "initial panel authentication failed"
                );
            }
        }
        Ok(client)
    }

    pub fn last_auth_state(&self) -> AuthState {
        self.inner.gate.last_state()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn settings(&self) -> &PanelSettings {
        &self.inner.settings
    }

    /// Runs the ensure-authenticated routine without issuing an API call.
    pub async fn ensure_authenticated(&self) -> PanelResult<AuthState> {
        self.inner.gate.ensure_authenticated().await?;
        Ok(self.last_auth_state())
    }

    /// Drops the stored cookies and the cached session marker, so the next
    /// call probes the panel and logs in from scratch.
    pub async fn reset_session(&self) -> PanelResult<()> {
        self.inner.transport.jar().clear()?;
        self.inner.settings.invalidate_session().await?;
        tracing::info!(target: "session", "panel session reset");
        Ok(())
    }

    /// Raw session probe; does not change the auth state.
    pub async fn is_session_valid(&self) -> bool {
        self.inner.gate.authenticator().is_session_valid().await
    }

    pub async fn services(&self) -> PanelResult<Vec<u64>> {
        self.inner.settings.services().await
    }

    pub async fn service_id(&self, index: usize) -> PanelResult<Option<u64>> {
        Ok(self.services().await?.get(index).copied())
    }

    pub async fn list_orders(
        &self,
        service_id: u64,
        status: OrderStatus,
        page_size: u32,
    ) -> PanelResult<Outcome<Vec<Order>>> {
        let path = format!(
            "/admin/api/orders/list?status={}&service={service_id}&page_size={page_size}",
            status.code()
        );
        let outcome = self.call("orders.list", ApiMethod::Get, &path, None).await?;
        Ok(match outcome {
            Outcome::Done(body) => Outcome::Done(parse_order_list(&body)),
            Outcome::Disabled => Outcome::Disabled,
        })
    }

    pub async fn set_start_count(&self, id: u64, start_count: u64) -> PanelResult<Outcome<bool>> {
        let body = json!({ "start_count": start_count });
        self.mutate(
            "orders.set_start_count",
            &format!("/admin/api/orders/set-start-count/{id}"),
            Some(body),
        )
        .await
    }

    pub async fn set_partial(&self, id: u64, remains: u64) -> PanelResult<Outcome<bool>> {
        let body = json!({ "remains": remains });
        self.mutate(
            "orders.set_partial",
            &format!("/admin/api/orders/set-partial/{id}"),
            Some(body),
        )
        .await
    }

    pub async fn cancel_order(&self, id: u64) -> PanelResult<Outcome<bool>> {
        self.mutate("orders.cancel", &format!("/admin/api/orders/cancel/{id}"), None)
            .await
    }

    pub async fn change_status(&self, id: u64, status: OrderStatus) -> PanelResult<Outcome<bool>> {
        let body = json!({ "status": status.code() });
        self.mutate(
            "orders.change_status",
            &format!("/admin/api/orders/change-status/{id}"),
            Some(body),
        )
        .await
    }

    async fn mutate(
        &self,
        endpoint: &str,
        path: &str,
        body: Option<Value>,
    ) -> PanelResult<Outcome<bool>> {
        let outcome = self.call(endpoint, ApiMethod::Post, path, body.as_ref()).await?;
        Ok(match outcome {
            Outcome::Done(reply) => Outcome::Done(acknowledged(endpoint, &reply)),
            Outcome::Disabled => Outcome::Disabled,
        })
    }

    async fn call(
        &self,
        endpoint: &str,
        method: ApiMethod,
        path: &str,
        body: Option<&Value>,
    ) -> PanelResult<Outcome<String>> {
        let gate = &self.inner.gate;
        let Access::Ready { generation } = gate.ensure_authenticated().await? else {
            tracing::debug!(target: "panel", endpoint, "login disabled; skipping call");
            return Ok(Outcome::Disabled);
        };

        let status = match self.send(endpoint, method, path, body).await? {
            Reply::Body(reply) => return Ok(Outcome::Done(reply)),
            Reply::Unauthorized(status) => status,
        };

        tracing::warn!(
            target: "panel",
            endpoint,
            status = status.as_u16(),
            "panel rejected session; re-authenticating once"
        );
        self.inner.metrics.inc_api_reauth();
        if let Access::Disabled = gate.reauthenticate_after_rejection(generation).await? {
            return Ok(Outcome::Disabled);
        }

        match self.send(endpoint, method, path, body).await? {
            Reply::Body(reply) => Ok(Outcome::Done(reply)),
            Reply::Unauthorized(status) => Err(PanelError::Unauthorized {
                status: status.as_u16(),
                path: path.to_string(),
            }),
        }
    }

    async fn send(
        &self,
        endpoint: &str,
        method: ApiMethod,
        path: &str,
        body: Option<&Value>,
    ) -> PanelResult<Reply> {
        let transport = &self.inner.transport;
        let started = Instant::now();
        let resp = match method {
            ApiMethod::Get => transport.get(Profile::Xhr, path).await?,
            ApiMethod::Post => transport.post_json(Profile::Xhr, path, body).await?,
        };
        self.inner
            .metrics
            .observe_api_request(endpoint, started.elapsed().as_secs_f64() * 1_000.0);

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Reply::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(PanelError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(Reply::Body(resp.text().await?))
    }
}

#[derive(Debug, Clone, Copy)]
enum ApiMethod {
    Get,
    Post,
}

/// A 2xx reply counts as acknowledged unless its JSON says `success: false`.
fn acknowledged(endpoint: &str, reply: &str) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(reply) else {
        return true;
    };
    match map.get("success") {
        Some(Value::Bool(false)) => {
            let reason = map
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            tracing::warn!(
                target: "panel",
                endpoint,
                error = reason,
                "panel declined order update"
            );
            false
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, PanelConfig, StoreConfig};
    use crate::store::MemoryStore;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_HTML: &str =
        r#"<html><head><meta name="csrf-token" content="tok-1"></head><form id="SignInForm"></form></html>"#;
    const ACCOUNT_HTML: &str = r#"<html><input name="current_password"></html>"#;

    struct Harness {
        server: MockServer,
        store: Arc<MemoryStore>,
        client: PanelClient,
        _dir: tempfile::TempDir,
    }

    async fn harness(login_enabled: bool, auth: AuthConfig) -> Harness {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            panel: PanelConfig {
                base_uri: server.uri(),
                cookie_path: dir.path().join("cookies.json"),
                request_timeout_ms: 2_000,
                ..Default::default()
            },
            auth,
            store: StoreConfig::default(),
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::new());
        store
            .put("bjs.credentials.username", json!("testuser"), None)
            .await
            .unwrap();
        store
            .put("bjs.credentials.password", json!("testpass"), None)
            .await
            .unwrap();
        store
            .put("bjs.session.login_toggle", json!(login_enabled), None)
            .await
            .unwrap();

        let client = PanelClient::new(&cfg, store.clone(), Metrics::new()).unwrap();
        Harness {
            server,
            store,
            client,
            _dir: dir,
        }
    }

    fn fast_auth() -> AuthConfig {
        AuthConfig {
            max_retries: 0,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    async fn mount_valid_session(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/admin/account"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_HTML))
            .mount(server)
            .await;
    }

    async fn requests_to(server: &MockServer, p: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == p)
            .count()
    }

    #[tokio::test]
    async fn disabled_login_returns_empty_without_traffic() {
        let h = harness(false, fast_auth()).await;

        let orders = h.client.list_orders(162, OrderStatus::Pending, 100).await.unwrap();
        assert!(orders.is_disabled());
        assert!(orders.into_value().is_empty());
        assert_eq!(
            h.client.cancel_order(1).await.unwrap().into_value(),
            false
        );
        assert_eq!(h.client.last_auth_state(), AuthState::Disabled);
        assert!(h.server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn lists_orders_with_valid_session() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/admin/api/orders/list"))
            .and(query_param("status", "0"))
            .and(query_param("service", "162"))
            .and(query_param("page_size", "100"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"data":{"orders":[{"id":1,"link":"@alice"}]}}"#),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        let orders = h
            .client
            .list_orders(162, OrderStatus::Pending, DEFAULT_PAGE_SIZE)
            .await
            .unwrap()
            .into_value();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 1);
        assert_eq!(h.client.last_auth_state(), AuthState::Valid);
    }

    #[tokio::test]
    async fn list_without_orders_path_is_empty() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/admin/api/orders/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{}}"#))
            .mount(&h.server)
            .await;

        let orders = h
            .client
            .list_orders(162, OrderStatus::Pending, 100)
            .await
            .unwrap();
        assert_eq!(orders, Outcome::Done(Vec::new()));
    }

    #[tokio::test]
    async fn session_cache_skips_repeated_probes() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/set-start-count/5"))
            .and(body_json(json!({ "start_count": 1200 })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true}"#))
            .expect(2)
            .mount(&h.server)
            .await;

        assert_eq!(h.client.set_start_count(5, 1200).await.unwrap(), Outcome::Done(true));
        assert_eq!(h.client.set_start_count(5, 1200).await.unwrap(), Outcome::Done(true));
        assert_eq!(requests_to(&h.server, "/admin/account").await, 1);
    }

    #[tokio::test]
    async fn expired_cache_is_rechecked() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/9"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&h.server)
            .await;

        h.client.cancel_order(9).await.unwrap();
        h.store
            .put("bjs.session.valid_until", json!(0), None)
            .await
            .unwrap();
        h.client.cancel_order(9).await.unwrap();
        assert_eq!(requests_to(&h.server, "/admin/account").await, 2);
    }

    #[tokio::test]
    async fn declined_mutation_reports_false() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/change-status/3"))
            .and(body_json(json!({ "status": 4 })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":false,"error_message":"already canceled"}"#),
            )
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/set-partial/3"))
            .and(body_json(json!({ "remains": 40 })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&h.server)
            .await;

        assert_eq!(
            h.client.change_status(3, OrderStatus::Canceled).await.unwrap(),
            Outcome::Done(false)
        );
        assert_eq!(h.client.set_partial(3, 40).await.unwrap(), Outcome::Done(true));
    }

    #[tokio::test]
    async fn unauthorized_call_reauthenticates_and_retries_once() {
        let h = harness(true, fast_auth()).await;
        // First probe succeeds, later probes (after login) too.
        mount_valid_session(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_HTML))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/11"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true}"#))
            .mount(&h.server)
            .await;

        assert_eq!(h.client.cancel_order(11).await.unwrap(), Outcome::Done(true));
        assert_eq!(h.client.last_auth_state(), AuthState::Reauthenticated);
        assert_eq!(requests_to(&h.server, "/admin/api/orders/cancel/11").await, 2);
    }

    #[tokio::test]
    async fn second_rejection_is_surfaced() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_HTML))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/12"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&h.server)
            .await;

        let err = h.client.cancel_order(12).await.unwrap_err();
        assert!(
            matches!(err, PanelError::Unauthorized { status: 403, .. }),
            "{err}"
        );
        assert_eq!(requests_to(&h.server, "/admin/api/orders/cancel/12").await, 2);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/13"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&h.server)
            .await;

        let err = h.client.cancel_order(13).await.unwrap_err();
        assert!(err.is_network(), "{err}");
        assert_eq!(requests_to(&h.server, "/admin/api/orders/cancel/13").await, 1);
        assert_eq!(h.store.get("bjs.session.failed_attempts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn services_and_index_lookup() {
        let h = harness(false, fast_auth()).await;
        h.store
            .put("bjs.services", json!([195, 190, 91]), None)
            .await
            .unwrap();

        assert_eq!(h.client.services().await.unwrap(), vec![195, 190, 91]);
        assert_eq!(h.client.service_id(1).await.unwrap(), Some(190));
        assert_eq!(h.client.service_id(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn connect_runs_initial_check() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_valid_session(&server).await;

        let cfg = AppConfig {
            panel: PanelConfig {
                base_uri: server.uri(),
                cookie_path: dir.path().join("cookies.json"),
                ..Default::default()
            },
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        store
            .put("bjs.session.login_toggle", json!(true), None)
            .await
            .unwrap();

        let client = PanelClient::connect(&cfg, store, Metrics::new()).await.unwrap();
        assert_eq!(client.last_auth_state(), AuthState::Valid);
    }

    #[tokio::test]
    async fn reset_session_forces_a_fresh_probe() {
        let h = harness(true, fast_auth()).await;
        Mock::given(method("GET"))
            .and(path("/admin/account"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "PHPSESSID=abc; Path=/")
                    .set_body_string(ACCOUNT_HTML),
            )
            .up_to_n_times(1)
            .mount(&h.server)
            .await;
        mount_valid_session(&h.server).await;

        h.client.ensure_authenticated().await.unwrap();
        assert!(!h.client.inner.transport.jar().is_empty());

        h.client.reset_session().await.unwrap();
        assert!(h.client.inner.transport.jar().is_empty());
        assert_eq!(h.store.get("bjs.session.valid_until").await.unwrap(), None);

        h.client.ensure_authenticated().await.unwrap();
        assert_eq!(requests_to(&h.server, "/admin/account").await, 2);
    }

    #[tokio::test]
    async fn calls_are_counted_in_metrics() {
        let h = harness(true, fast_auth()).await;
        mount_valid_session(&h.server).await;
        Mock::given(method("POST"))
            .and(path("/admin/api/orders/cancel/21"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&h.server)
            .await;

        h.client.cancel_order(21).await.unwrap();
        let text = String::from_utf8(h.client.metrics().render()).unwrap();
        assert!(text.contains(r#"bjs_api_requests_total{endpoint="orders.cancel"} 1"#), "{text}");
        assert!(text.contains(r#"bjs_session_checks_total{result="valid"} 1"#), "{text}");
    }
}
