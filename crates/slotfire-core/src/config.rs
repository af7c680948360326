use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotfireError};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Booking windows open seven days ahead…
pub const DEFAULT_LEAD_DAYS: i64 = 7;
/// …at one minute past midnight.
pub const DEFAULT_TRIGGER_TIME: &str = "00:01";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const MAX_ATTEMPTS_CAP: u32 = 50;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 120;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PERSISTENCE_RETRIES: u32 = 5;
pub const DEFAULT_PERSISTENCE_BACKOFF_MS: u64 = 200;
pub const DEFAULT_MAX_PERSISTENCE_BACKOFF_MS: u64 = 30_000;

/// Top-level config (slotfire.toml + SLOTFIRE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlotfireConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    /// No authentication. Use only on loopback or trusted networks.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// How the delay between executor attempts grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after each failed attempt, capped at `max_retry_delay_secs`.
    Exponential,
}

/// Scheduling defaults and dispatch retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lead window applied when a create request omits one.
    #[serde(default = "default_lead_days")]
    pub default_lead_days: i64,
    /// `HH:MM` local trigger time applied when a create request omits one.
    #[serde(default = "default_trigger_time")]
    pub default_trigger_time: String,
    /// IANA zone name applied when a create request omits one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub backoff: BackoffMode,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
    /// Upper bound on a single executor call.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Tries for a status write before the dispatcher escalates. A claim
    /// that keeps failing is handed back to the timer engine; an outcome
    /// write keeps retrying at the back-off cap.
    #[serde(default = "default_persistence_retries")]
    pub persistence_retries: u32,
    #[serde(default = "default_persistence_backoff_ms")]
    pub persistence_backoff_ms: u64,
    /// Cap for the doubling status-write back-off.
    #[serde(default = "default_max_persistence_backoff_ms")]
    pub max_persistence_backoff_ms: u64,
    /// Send the owner a "firing now" notice before the first attempt.
    #[serde(default = "bool_true")]
    pub notify_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_lead_days: DEFAULT_LEAD_DAYS,
            default_trigger_time: DEFAULT_TRIGGER_TIME.to_string(),
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            backoff: BackoffMode::default(),
            max_retry_delay_secs: DEFAULT_MAX_RETRY_DELAY_SECS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            persistence_retries: DEFAULT_PERSISTENCE_RETRIES,
            persistence_backoff_ms: DEFAULT_PERSISTENCE_BACKOFF_MS,
            max_persistence_backoff_ms: DEFAULT_MAX_PERSISTENCE_BACKOFF_MS,
            notify_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Parse `default_trigger_time`.
    pub fn trigger_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.default_trigger_time, "%H:%M").map_err(|e| {
            SlotfireError::Config(format!(
                "scheduler.default_trigger_time '{}': {e}",
                self.default_trigger_time
            ))
        })
    }
}

/// Webhook executor settings. With no URL the gateway refuses to start
/// dispatching, since there is nothing to run jobs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub webhook_url: Option<String>,
    /// Bearer token sent to the webhook, if it requires one.
    pub webhook_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifierConfig {
    /// Owner ids are Telegram chat ids when this is set; otherwise
    /// notifications are only logged.
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_lead_days() -> i64 {
    DEFAULT_LEAD_DAYS
}
fn default_trigger_time() -> String {
    DEFAULT_TRIGGER_TIME.to_string()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_max_retry_delay_secs() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_SECS
}
fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}
fn default_persistence_retries() -> u32 {
    DEFAULT_PERSISTENCE_RETRIES
}
fn default_persistence_backoff_ms() -> u64 {
    DEFAULT_PERSISTENCE_BACKOFF_MS
}
fn default_max_persistence_backoff_ms() -> u64 {
    DEFAULT_MAX_PERSISTENCE_BACKOFF_MS
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.slotfire/slotfire.db", home)
}

impl SlotfireConfig {
    /// Load config from a TOML file with SLOTFIRE_* env var overrides.
    ///
    /// Nested keys use a double underscore so snake_case field names survive:
    /// `SLOTFIRE_SCHEDULER__MAX_ATTEMPTS=3`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config = Self::figment(&path).extract::<SlotfireConfig>().map_err(|e| {
            SlotfireError::Config(e.to_string())
        })?;
        config.validate()?;
        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(SlotfireConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SLOTFIRE_").split("__"))
    }

    /// Reject settings that would make the engine misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        s.trigger_time()?;
        if s.default_lead_days < 0 {
            return Err(SlotfireError::Config(
                "scheduler.default_lead_days must not be negative".into(),
            ));
        }
        if s.max_attempts == 0 || s.max_attempts > MAX_ATTEMPTS_CAP {
            return Err(SlotfireError::Config(format!(
                "scheduler.max_attempts must be between 1 and {MAX_ATTEMPTS_CAP}"
            )));
        }
        if s.attempt_timeout_secs == 0 {
            return Err(SlotfireError::Config(
                "scheduler.attempt_timeout_secs must be positive".into(),
            ));
        }
        if self.gateway.auth.mode == AuthMode::Token && self.gateway.auth.token.is_none() {
            return Err(SlotfireError::Config(
                "gateway.auth.token is required in token mode".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.slotfire/slotfire.toml", home)
}
