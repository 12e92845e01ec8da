use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::clients::transport::{Profile, Transport};
use crate::error::{PanelError, PanelResult};
use crate::ops::metrics::Metrics;
use crate::store::PanelSettings;

pub const LOGIN_PATH: &str = "/admin";
pub const ACCOUNT_PATH: &str = "/admin/account";

const CSRF_FIELD: &str = "_csrf_admin";
const LOGIN_FORM_MARKER: &str = "SignInForm";
const ACCOUNT_PAGE_MARKER: &str = "current_password";

/// Cookie/CSRF form login against the panel.
#[derive(Debug, Clone)]
pub struct Authenticator {
    transport: Arc<Transport>,
    settings: PanelSettings,
    metrics: Metrics,
}

impl Authenticator {
    pub fn new(transport: Arc<Transport>, settings: PanelSettings, metrics: Metrics) -> Self {
        Self {
            transport,
            settings,
            metrics,
        }
    }

    /// Probes the account page with the current cookies. Any transport or
    /// status failure reads as `false`.
    pub async fn is_session_valid(&self) -> bool {
        let valid = match self.fetch_account_page().await {
            Ok(body) => is_account_page(&body),
            Err(err) => {
                tracing::debug!(
                    target: "session",
                    error = %err,
                    "session probe failed"
                );
                false
            }
        };
        self.metrics.observe_session_check(valid);
        valid
    }

    /// One login attempt: fresh CSRF token, credentials from the store, form
    /// post, then a session probe to confirm.
    pub async fn login(&self) -> PanelResult<()> {
        let page = self.transport.get(Profile::Page, LOGIN_PATH).await?;
        let status = page.status();
        if !status.is_success() {
            return Err(PanelError::Status {
                status: status.as_u16(),
                path: LOGIN_PATH.to_string(),
            });
        }
        let html = page.text().await?;
        let token = extract_csrf_token(&html).ok_or(PanelError::CsrfNotFound)?;

        let credentials = self
            .settings
            .credentials()
            .await?
            .ok_or(PanelError::MissingCredentials)?;

        tracing::info!(
            target: "auth",
            username = %credentials.username,
            "submitting panel login form"
        );
        let form = [
            (CSRF_FIELD, token.as_str()),
            ("SignInForm[login]", credentials.username.as_str()),
            ("SignInForm[password]", credentials.password.as_str()),
            ("SignInForm[remember]", "1"),
        ];
        let resp = self.transport.post_form(LOGIN_PATH, &form).await?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(PanelError::Status {
                status: status.as_u16(),
                path: LOGIN_PATH.to_string(),
            });
        }

        if !self.is_session_valid().await {
            return Err(PanelError::LoginRejected);
        }
        Ok(())
    }

    async fn fetch_account_page(&self) -> PanelResult<String> {
        let resp = self.transport.get(Profile::Page, ACCOUNT_PATH).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PanelError::Status {
                status: status.as_u16(),
                path: ACCOUNT_PATH.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

fn csrf_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<meta name="csrf-token" content="([^"]+)">"#).expect("csrf pattern")
    })
}

pub fn extract_csrf_token(html: &str) -> Option<String> {
    csrf_pattern()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Authenticated account page: has the password-change field, no login form.
pub fn is_account_page(body: &str) -> bool {
    !body.contains(LOGIN_FORM_MARKER) && body.contains(ACCOUNT_PAGE_MARKER)
}
