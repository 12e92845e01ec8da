use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::PanelError;

/// Outcome of the most recent authentication check made by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthState {
    /// Login is turned off (or no credentials); no traffic is sent.
    Disabled = 0,
    /// The existing session was accepted without logging in.
    Valid = 1,
    /// A login flow just succeeded.
    Reauthenticated = 2,
    /// A login flow exhausted its retries.
    Failed = 3,
}

impl AuthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Valid => "valid",
            Self::Reauthenticated => "reauthenticated",
            Self::Failed => "failed",
        }
    }

    /// Operator-facing summary.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Valid => "Using existing session",
            Self::Reauthenticated => "Session renewed - re-authenticated",
            Self::Failed => "Session authentication failed",
            Self::Disabled => "Login toggle is false - session disabled",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Valid,
            2 => Self::Reauthenticated,
            3 => Self::Failed,
            _ => Self::Disabled,
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free view of the auth outcome plus a login generation counter.
///
/// The generation advances on every successful login; API calls remember
/// the generation they were sent under so a 401 raced by another caller's
/// login can be retried without logging in again.
///
/// Completed login flows are counted separately, successful or not, and the
/// error of the last failed one is kept. Callers that queued behind a flow
/// take its outcome instead of starting another.
#[derive(Debug)]
pub struct AuthTracker {
    state: AtomicU8,
    generation: AtomicU64,
    flows: AtomicU64,
    last_failure: Mutex<Option<PanelError>>,
}

impl Default for AuthTracker {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(AuthState::Disabled as u8),
            generation: AtomicU64::new(0),
            flows: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }
}

impl AuthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        AuthState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: AuthState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            tracing::debug!(
                target: "auth",
                from = AuthState::from_u8(prev).as_str(),
                to = state.as_str(),
                "auth state changed"
            );
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Records a successful login and returns the new generation.
    pub fn record_login(&self) -> u64 {
        self.set(AuthState::Reauthenticated);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of login flows completed so far.
    pub fn flows(&self) -> u64 {
        self.flows.load(Ordering::Acquire)
    }

    /// Marks a login flow as finished with `failure` as its outcome.
    pub fn finish_flow(&self, failure: Option<&PanelError>) {
        let mut last = self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = failure.map(PanelError::replay);
        self.flows.fetch_add(1, Ordering::AcqRel);
    }

    /// Outcome of the latest flow if one finished after `seen_flows` was read.
    pub fn flow_outcome_since(&self, seen_flows: u64) -> Option<Result<(), PanelError>> {
        if self.flows() == seen_flows {
            return None;
        }
        let last = self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(match last.as_ref() {
            Some(err) => Err(err.replay()),
            None => Ok(()),
        })
    }
}
