//! Worker configuration, built from environment variables.

/// Global SMTP override. When `SMTP_HOST` is set, this wins over any
/// channel-resolved configuration for every message.
#[derive(Debug, Clone)]
pub struct SmtpOverride {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SmtpOverride {
    /// Build the override from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (override disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let secure = std::env::var("SMTP_SECURE").is_ok_and(|v| v == "true");
        let username = std::env::var("SMTP_USER").ok().filter(|s| !s.is_empty());
        let password = std::env::var("SMTP_PASS").ok();

        Some(Self {
            host,
            port,
            secure,
            username,
            password,
        })
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Run exactly one poll cycle and exit (cron-style invocation).
    pub run_once: bool,
    /// From-address used when the resolved channel has none.
    pub default_from: String,
    /// Global SMTP override; bypasses channel resolution when present.
    pub smtp_override: Option<SmtpOverride>,
    /// Port for the control API server.
    pub control_port: u16,
    /// Shared secret for the control endpoints. `None` disables the check.
    pub control_secret: Option<String>,
    /// Path to the local database file.
    pub db_path: String,
}

impl WorkerConfig {
    /// Build config from environment variables, with defaults for anything unset.
    pub fn from_env() -> Self {
        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let run_once = std::env::var("RUN_ONCE").is_ok_and(|v| v == "true");

        let default_from = std::env::var("SMTP_FROM")
            .or_else(|_| std::env::var("DEFAULT_FROM"))
            .unwrap_or_else(|_| "no-reply@example.com".to_string());

        let control_port: u16 = std::env::var("RETRY_SERVER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3001);

        let control_secret = std::env::var("RETRY_SECRET").ok().filter(|s| !s.is_empty());

        let db_path =
            std::env::var("OUTBOX_DB_PATH").unwrap_or_else(|_| "./data/outbox.db".to_string());

        Self {
            poll_interval_secs,
            run_once,
            default_from,
            smtp_override: SmtpOverride::from_env(),
            control_port,
            control_secret,
            db_path,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            run_once: false,
            default_from: "no-reply@example.com".to_string(),
            smtp_override: None,
            control_port: 3001,
            control_secret: None,
            db_path: "./data/outbox.db".to_string(),
        }
    }
}
