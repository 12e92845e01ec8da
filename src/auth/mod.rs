pub mod authenticator;
pub mod retry;
pub mod state;

use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::AuthConfig;
use crate::error::{PanelError, PanelResult};
use crate::ops::metrics::Metrics;
use crate::store::PanelSettings;
use crate::time::now_ms;

pub use authenticator::Authenticator;
pub use retry::RetryPolicy;
pub use state::{AuthState, AuthTracker};

/// Result of the ensure-authenticated routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Requests may be sent; `generation` identifies the login they ride on.
    Ready { generation: u64 },
    /// Login is turned off; callers return their no-op result.
    Disabled,
}

/// The single place where authentication decisions are made.
///
/// All checks and logins run under one async mutex, so concurrent callers
/// that find the session stale wait for one login instead of each starting
/// their own.
#[derive(Debug)]
pub struct AuthGate {
    authenticator: Authenticator,
    settings: PanelSettings,
    retry: RetryPolicy,
    max_failed_attempts: u64,
    session_ttl: Duration,
    tracker: AuthTracker,
    metrics: Metrics,
    lock: Mutex<()>,
}

impl AuthGate {
    pub fn new(
        authenticator: Authenticator,
        settings: PanelSettings,
        cfg: &AuthConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            authenticator,
            settings,
            retry: RetryPolicy::from_config(cfg),
            max_failed_attempts: cfg.max_failed_attempts.max(1),
            session_ttl: cfg.session_cache_ttl(),
            tracker: AuthTracker::new(),
            metrics,
            lock: Mutex::new(()),
        }
    }

    pub fn last_state(&self) -> AuthState {
        self.tracker.state()
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub async fn ensure_authenticated(&self) -> PanelResult<Access> {
        let seen_flows = self.tracker.flows();
        let _guard = self.lock.lock().await;

        if !self.login_enabled().await? {
            return Ok(Access::Disabled);
        }
        if let Some(outcome) = self.joined_flow(seen_flows) {
            return outcome;
        }

        let now = now_ms();
        if let Some(until) = self.settings.session_valid_until_ms().await? {
            if now < until {
                if !matches!(
                    self.tracker.state(),
                    AuthState::Valid | AuthState::Reauthenticated
                ) {
                    self.tracker.set(AuthState::Valid);
                }
                return Ok(self.ready());
            }
        }

        if self.authenticator.is_session_valid().await {
            self.settings.mark_session_valid(now, self.session_ttl).await?;
            self.tracker.set(AuthState::Valid);
            tracing::debug!(target: "session", "existing panel session accepted");
            return Ok(self.ready());
        }

        tracing::info!(target: "session", "panel session expired; logging in");
        self.login_with_retry().await
    }

    /// Called after the panel answered 401/403 to a request sent under
    /// `seen_generation`. Logs in again unless another caller already did.
    pub async fn reauthenticate_after_rejection(&self, seen_generation: u64) -> PanelResult<Access> {
        let seen_flows = self.tracker.flows();
        let _guard = self.lock.lock().await;

        if !self.login_enabled().await? {
            return Ok(Access::Disabled);
        }
        if let Some(outcome) = self.joined_flow(seen_flows) {
            return outcome;
        }

        if self.tracker.generation() != seen_generation {
            tracing::debug!(
                target: "session",
                seen_generation,
                current_generation = self.tracker.generation(),
                "session already renewed by another caller"
            );
            return Ok(self.ready());
        }

        self.settings.invalidate_session().await?;
        self.login_with_retry().await
    }

    async fn login_enabled(&self) -> PanelResult<bool> {
        let enabled = self.settings.login_enabled().await?;
        if !enabled {
            self.tracker.set(AuthState::Disabled);
        }
        Ok(enabled)
    }

    fn ready(&self) -> Access {
        Access::Ready {
            generation: self.tracker.generation(),
        }
    }

    /// A login flow that finished while this caller waited for `lock`
    /// answers for it: no second login, no second failed attempt.
    fn joined_flow(&self, seen_flows: u64) -> Option<PanelResult<Access>> {
        let outcome = self.tracker.flow_outcome_since(seen_flows)?;
        tracing::debug!(
            target: "session",
            failed = outcome.is_err(),
            "taking the outcome of the login flow that ran while waiting"
        );
        Some(outcome.map(|()| self.ready()))
    }

    /// Must be called with `lock` held.
    async fn login_with_retry(&self) -> PanelResult<Access> {
        let result = self.run_login_flow().await;
        self.tracker.finish_flow(result.as_ref().err());
        result
    }

    async fn run_login_flow(&self) -> PanelResult<Access> {
        if self.settings.credentials().await?.is_none() {
            tracing::warn!(target: "auth", "login enabled but panel credentials are missing");
            self.tracker.set(AuthState::Disabled);
            return Err(PanelError::MissingCredentials);
        }

        let result = self
            .retry
            .run(|attempt| {
                self.metrics.inc_login_attempts();
                tracing::debug!(target: "auth", attempt = attempt + 1, "login attempt");
                self.authenticator.login()
            })
            .await;

        match result {
            Ok(()) => {
                self.settings.reset_failed_attempts().await?;
                self.settings
                    .mark_session_valid(now_ms(), self.session_ttl)
                    .await?;
                let generation = self.tracker.record_login();
                tracing::info!(target: "auth", generation, "panel login succeeded");
                Ok(Access::Ready { generation })
            }
            Err(err) => self.record_login_failure(err).await,
        }
    }

    async fn record_login_failure(&self, err: PanelError) -> PanelResult<Access> {
        self.metrics.inc_login_failures();
        self.settings.invalidate_session().await?;

        if !err.counts_as_auth_failure() {
            self.tracker.set(AuthState::Failed);
            tracing::warn!(
                target: "auth",
                error = %err,
                "panel login failed without an authentication verdict"
            );
            return Err(err);
        }

        let attempts = self.settings.record_failed_attempt().await?;
        if attempts >= self.max_failed_attempts {
            self.settings.disable_login().await?;
            self.tracker.set(AuthState::Disabled);
            self.metrics.inc_lockouts();
            tracing::error!(
                target: "auth",
                attempts,
                max_failed_attempts = self.max_failed_attempts,
                error = %err,
                "too many failed panel logins; login disabled until re-enabled"
            );
            return Err(PanelError::SessionLocked {
                attempts,
                source: Box::new(err),
            });
        }

        self.tracker.set(AuthState::Failed);
        tracing::warn!(
            target: "auth",
            attempts,
            max_failed_attempts = self.max_failed_attempts,
            error = %err,
            "panel login failed"
        );
        Err(err)
    }
}
