use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DlqConfig, MqAppConfig, StorageConfig};
pub use worker::config::WorkerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Reveal policy.
#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    /// How long a produced artifact may be re-served to the same viewer.
    /// Default: 7.
    #[serde(default = "default_freshness_days")]
    pub freshness_days: u32,
    /// Accept new uploads. Default: true.
    #[serde(default = "default_uploads_enabled")]
    pub uploads_enabled: bool,
    /// How long a job poll waits for completion before answering
    /// "processing". Default: 5.
    #[serde(default = "default_poll_cooldown_secs")]
    pub poll_cooldown_secs: u64,
}

fn default_freshness_days() -> u32 {
    7
}
fn default_uploads_enabled() -> bool {
    true
}
fn default_poll_cooldown_secs() -> u64 {
    5
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            freshness_days: default_freshness_days(),
            uploads_enabled: default_uploads_enabled(),
            poll_cooldown_secs: default_poll_cooldown_secs(),
        }
    }
}

impl VaultConfig {
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.freshness_days as i64)
    }
}

/// Where "artifact ready" notices go.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifierConfig {
    /// POST target for ready notices. Unset: notices are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CAMS_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite://./data/cams.db?mode=rwc")?
            .set_default("vault.freshness_days", 7)?
            .add_source(File::with_name(&config_path).required(false))
            // e.g. CAMS__VAULT__FRESHNESS_DAYS=3
            .add_source(Environment::with_prefix("CAMS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn defaults_cover_every_section() {
        unsafe {
            std::env::set_var("CAMS_CONFIG", "does/not/exist");
        }
        let cfg = AppConfig::load().unwrap();
        unsafe {
            std::env::remove_var("CAMS_CONFIG");
        }
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.vault.freshness_days, 7);
        assert!(cfg.vault.uploads_enabled);
        assert!(!cfg.mq.enabled);
        assert_eq!(cfg.mq.retry.max_attempts, 3);
        assert_eq!(cfg.worker.concurrency, 2);
        assert!(cfg.notifier.webhook_url.is_none());
    }

    #[test]
    #[serial_test::serial]
    fn environment_overrides_nested_keys() {
        unsafe {
            std::env::set_var("CAMS_CONFIG", "does/not/exist");
            std::env::set_var("CAMS__VAULT__FRESHNESS_DAYS", "3");
            std::env::set_var("CAMS__MQ__RETRY__MAX_ATTEMPTS", "5");
        }
        let cfg = AppConfig::load().unwrap();
        unsafe {
            std::env::remove_var("CAMS_CONFIG");
            std::env::remove_var("CAMS__VAULT__FRESHNESS_DAYS");
            std::env::remove_var("CAMS__MQ__RETRY__MAX_ATTEMPTS");
        }
        assert_eq!(cfg.vault.freshness_window(), chrono::Duration::days(3));
        assert_eq!(cfg.mq.retry.max_attempts, 5);
    }
}
