use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{PanelError, PanelResult};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    pub panel: PanelConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub infra: InfraConfig,
}

impl AppConfig {
    pub fn validate(&self) -> PanelResult<()> {
        self.panel.validate()?;
        self.auth.validate()?;
        self.store.validate()?;
        self.infra.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    pub base_uri: String,
    /// Cookie jar file shared by the page and XHR call profiles.
    pub cookie_path: PathBuf,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Path appended to `base_uri` for the `Referer` header on XHR calls.
    pub referer_path: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_uri: "https://belanjasosmed.com".to_string(),
            cookie_path: PathBuf::from("storage/bjs-cookies.json"),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            referer_path: "/admin/orders?status=0&service=11".to_string(),
        }
    }
}

impl PanelConfig {
    pub fn validate(&self) -> PanelResult<()> {
        let base = self.base_uri.trim();
        if base.is_empty() {
            return Err(PanelError::Config("panel.base_uri must be set".to_string()));
        }
        let parsed = url::Url::parse(base).map_err(|e| {
            PanelError::Config(format!("panel.base_uri is not a valid url ({base}): {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PanelError::Config(format!(
                "panel.base_uri must be http(s), got {}",
                parsed.scheme()
            )));
        }
        if self.cookie_path.as_os_str().is_empty() {
            return Err(PanelError::Config(
                "panel.cookie_path must be set".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(PanelError::Config(
                "panel.request_timeout_ms must be >0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PanelError::Config(
                "panel.connect_timeout_ms must be >0".to_string(),
            ));
        }
        if !self.referer_path.starts_with('/') {
            return Err(PanelError::Config(format!(
                "panel.referer_path must start with '/', got {}",
                self.referer_path
            )));
        }
        Ok(())
    }

    pub fn base(&self) -> &str {
        self.base_uri.trim().trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Additional login attempts after the first one.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Consecutive failed re-authentications before login is disabled.
    pub max_failed_attempts: u64,
    pub session_cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            max_failed_attempts: 3,
            session_cache_ttl_secs: 600,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> PanelResult<()> {
        if self.max_retries > 20 {
            return Err(PanelError::Config(format!(
                "auth.max_retries must be <=20, got {}",
                self.max_retries
            )));
        }
        if self.max_failed_attempts == 0 {
            return Err(PanelError::Config(
                "auth.max_failed_attempts must be >0".to_string(),
            ));
        }
        if self.session_cache_ttl_secs == 0 {
            return Err(PanelError::Config(
                "auth.session_cache_ttl_secs must be >0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Backing file for the CLI's key/value store.
    pub path: PathBuf,
    pub keys: StoreKeys,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage/bjs-store.json"),
            keys: StoreKeys::default(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> PanelResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(PanelError::Config("store.path must be set".to_string()));
        }
        self.keys.validate()
    }
}

/// Names of the entries the client reads and writes in the external store.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StoreKeys {
    pub username: String,
    pub password: String,
    pub login_toggle: String,
    pub failed_attempts: String,
    pub session_valid_until: String,
    pub services: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            username: "bjs.credentials.username".to_string(),
            password: "bjs.credentials.password".to_string(),
            login_toggle: "bjs.session.login_toggle".to_string(),
            failed_attempts: "bjs.session.failed_attempts".to_string(),
            session_valid_until: "bjs.session.valid_until".to_string(),
            services: "bjs.services".to_string(),
        }
    }
}

impl StoreKeys {
    pub fn validate(&self) -> PanelResult<()> {
        let keys = [
            ("store.keys.username", &self.username),
            ("store.keys.password", &self.password),
            ("store.keys.login_toggle", &self.login_toggle),
            ("store.keys.failed_attempts", &self.failed_attempts),
            ("store.keys.session_valid_until", &self.session_valid_until),
            ("store.keys.services", &self.services),
        ];
        for (name, key) in keys {
            if key.trim().is_empty() {
                return Err(PanelError::Config(format!("{name} must be set")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfraConfig {
    pub log_level: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl InfraConfig {
    pub fn validate(&self) -> PanelResult<()> {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(PanelError::Config(format!(
                "infra.log_level must be one of trace|debug|info|warn|error|off, got {other}"
            ))),
        }
    }
}

pub fn load_config() -> PanelResult<AppConfig> {
    let figment = build_figment_from_env()?;
    load_config_from(figment)
}

fn build_figment_from_env() -> PanelResult<Figment> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Ok(path) = std::env::var("BJS_CONFIG_PATH") {
        figment = merge_config_file(figment, &path)?;
    }

    figment = figment.merge(Env::prefixed("BJS_").split("__").ignore(&["CONFIG_PATH"]));
    Ok(figment)
}

fn merge_config_file(figment: Figment, path: &str) -> PanelResult<Figment> {
    let p = Path::new(path);
    match p.extension().and_then(|s| s.to_str()) {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(PanelError::Config(format!(
            "unsupported config file extension for BJS_CONFIG_PATH: {path} (expected .toml or .json)"
        ))),
    }
}

fn load_config_from(figment: Figment) -> PanelResult<AppConfig> {
    let cfg: AppConfig = figment
        .extract()
        .map_err(|e| PanelError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
