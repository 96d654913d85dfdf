use idcheck_core::config::parse_or;
use idcheck_core::Settings;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Socket address to listen on (default: 0.0.0.0:8000).
    pub listen_addr: String,
    /// Timeout in seconds for a single verification request.
    pub verify_timeout_secs: u64,
    /// Largest accepted multipart request body, in bytes.
    pub max_upload_bytes: usize,
    /// Pipeline settings shared with the CLI.
    pub settings: Settings,
}

impl Config {
    /// Load configuration from `IDCHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Invalid values are logged at `warn` and replaced by their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            listen_addr: lookup("IDCHECK_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            verify_timeout_secs: parse_or(&lookup, "IDCHECK_VERIFY_TIMEOUT_SECS", 30),
            max_upload_bytes: parse_or(&lookup, "IDCHECK_MAX_UPLOAD_BYTES", 25 * 1024 * 1024),
            settings: Settings::from_lookup(&lookup),
        }
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs.max(1))
    }
}
