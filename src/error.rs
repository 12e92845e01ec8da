use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure observed by a login flow another caller ran.
    #[error("network error: {0}")]
    Network(String),

    #[error("panel returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("panel rejected request to {path} with status {status} after re-authentication")]
    Unauthorized { status: u16, path: String },

    #[error("panel credentials not found in store")]
    MissingCredentials,

    #[error("failed to extract CSRF token from login page")]
    CsrfNotFound,

    #[error("form login failed: session not established")]
    LoginRejected,

    #[error("login disabled after {attempts} consecutive failed authentications: {source}")]
    SessionLocked {
        attempts: u64,
        #[source]
        source: Box<PanelError>,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type PanelResult<T> = Result<T, PanelError>;

impl PanelError {
    /// Transport-level failures: connection, DNS, timeouts and non-auth HTTP statuses.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Network(_) | Self::Status { .. })
    }

    /// Whether a login flow ending in this error counts toward the lockout threshold.
    pub fn counts_as_auth_failure(&self) -> bool {
        matches!(self, Self::CsrfNotFound | Self::LoginRejected)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::SessionLocked { .. })
    }

    /// Owned copy for handing one login outcome to several callers.
    /// Transport errors keep their kind and message, not the source value.
    pub fn replay(&self) -> PanelError {
        match self {
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
            Self::Http(err) => Self::Network(err.to_string()),
            Self::Network(msg) => Self::Network(msg.clone()),
            Self::Status { status, path } => Self::Status {
                status: *status,
                path: path.clone(),
            },
            Self::Unauthorized { status, path } => Self::Unauthorized {
                status: *status,
                path: path.clone(),
            },
            Self::MissingCredentials => Self::MissingCredentials,
            Self::CsrfNotFound => Self::CsrfNotFound,
            Self::LoginRejected => Self::LoginRejected,
            Self::SessionLocked { attempts, source } => Self::SessionLocked {
                attempts: *attempts,
                source: Box::new(source.replay()),
            },
            Self::Store(msg) => Self::Store(msg.clone()),
            Self::Decode(msg) => Self::Decode(msg.clone()),
        }
    }
}
