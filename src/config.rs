//! # Configuration Management
//!
//! Loads the denoise stage configuration from multiple sources:
//! - Built-in defaults (the `Default` impls below)
//! - An optional TOML file (`denoise.toml`)
//! - Environment variables with the `DENOISE_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `NCOMPASS_API_KEY` (special case for the credential)
//! 2. Environment variables (`DENOISE_SERVICE__OUT_FRAME_RATE=8000`, ...)
//! 3. Configuration file (`denoise.toml`)
//! 4. Default values
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are read from TOML/env and written back out
//! - **Builder setters**: `ServiceConfig::new(key).with_out_frame_rate(8000)`
//!   for library users that don't want file/env loading at all
//!
//! `ServiceConfig` is immutable once a stage is built from it; the stage wraps
//! it in an `Arc` and shares it read-only with the connection manager.

use crate::error::{DenoiseError, DenoiseResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted for the backend credential.
pub const API_KEY_ENV: &str = "NCOMPASS_API_KEY";

/// Default backend endpoint.
pub const DEFAULT_BACKEND_URL: &str = "wss://api.ncompass.tech/v1/denoise/stream";

/// Top-level configuration used by the command-line driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

/// Settings for one denoise stage and its backend connection.
///
/// ## Fields:
/// - `api_key`: backend credential, required
/// - `backend_url`: `ws://` or `wss://` endpoint of the denoiser
/// - `out_frame_rate`: sample rate of frames emitted downstream
/// - `backend_sample_rate`: rate the backend returns audio at
/// - `accumulation_window_ms`: how much audio to batch per network send
/// - `response_timeout_ms`: max wait for a batch response before the
///   connection is declared failed
/// - `connect_timeout_ms`: bound on the upgrade + handshake
/// - `reconnect_min_ms` / `reconnect_max_ms`: backoff floor and cap
/// - `outbound_queue`: batches that may wait for the socket writer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_key: String,
    pub backend_url: String,
    pub out_frame_rate: u32,
    pub backend_sample_rate: u32,
    pub accumulation_window_ms: u32,
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub outbound_queue: usize,
}

/// Logging settings for the binary.
///
/// `filter` uses `tracing_subscriber::EnvFilter` syntax; `RUST_LOG` wins over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            out_frame_rate: 16000,
            backend_sample_rate: 16000,
            accumulation_window_ms: 140,
            response_timeout_ms: 2000,
            connect_timeout_ms: 5000,
            reconnect_min_ms: 500,
            reconnect_max_ms: 10_000,
            outbound_queue: 32,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "stream_denoise=debug".to_string(),
        }
    }
}

// The credential never shows up in logs.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &"<redacted>")
            .field("backend_url", &self.backend_url)
            .field("out_frame_rate", &self.out_frame_rate)
            .field("backend_sample_rate", &self.backend_sample_rate)
            .field("accumulation_window_ms", &self.accumulation_window_ms)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("reconnect_min_ms", &self.reconnect_min_ms)
            .field("reconnect_max_ms", &self.reconnect_max_ms)
            .field("outbound_queue", &self.outbound_queue)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a configuration with defaults and the given credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn with_out_frame_rate(mut self, rate: u32) -> Self {
        self.out_frame_rate = rate;
        self
    }

    pub fn with_backend_sample_rate(mut self, rate: u32) -> Self {
        self.backend_sample_rate = rate;
        self
    }

    pub fn with_accumulation_window_ms(mut self, window_ms: u32) -> Self {
        self.accumulation_window_ms = window_ms;
        self
    }

    pub fn with_response_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.response_timeout_ms = timeout_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_reconnect_backoff_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.reconnect_min_ms = min_ms;
        self.reconnect_max_ms = max_ms;
        self
    }

    pub fn accumulation_window(&self) -> Duration {
        Duration::from_millis(self.accumulation_window_ms as u64)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - A credential is present
    /// - The backend URL is a websocket URL
    /// - Sample rates are non-zero
    /// - The accumulation window is between 10ms and 2s
    /// - Timeouts are non-zero and the backoff bounds are ordered
    pub fn validate(&self) -> DenoiseResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(DenoiseError::Config(format!(
                "api_key is required (set {} or service.api_key)",
                API_KEY_ENV
            )));
        }

        if !(self.backend_url.starts_with("ws://") || self.backend_url.starts_with("wss://")) {
            return Err(DenoiseError::Config(format!(
                "backend_url must be a ws:// or wss:// URL, got '{}'",
                self.backend_url
            )));
        }

        if self.out_frame_rate == 0 || self.backend_sample_rate == 0 {
            return Err(DenoiseError::Config("sample rates must be greater than 0".to_string()));
        }

        if !(10..=2000).contains(&self.accumulation_window_ms) {
            return Err(DenoiseError::Config(format!(
                "accumulation_window_ms must be within 10..=2000, got {}",
                self.accumulation_window_ms
            )));
        }

        if self.response_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(DenoiseError::Config("timeouts must be greater than 0".to_string()));
        }

        if self.reconnect_min_ms == 0 || self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(DenoiseError::Config(format!(
                "reconnect backoff must satisfy 0 < min <= max, got {}..{}",
                self.reconnect_min_ms, self.reconnect_max_ms
            )));
        }

        if self.outbound_queue == 0 {
            return Err(DenoiseError::Config("outbound_queue must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// Copy with the credential masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = "********".to_string();
        }
        copy
    }
}

impl AppConfig {
    /// Load configuration from defaults, `denoise.toml` and the environment.
    pub fn load() -> DenoiseResult<Self> {
        Self::load_from(None)
    }

    /// Same as [`AppConfig::load`] but with an explicit config file path.
    ///
    /// An explicit path must exist; the implicit `denoise.toml` is optional.
    pub fn load_from(path: Option<&Path>) -> DenoiseResult<Self> {
        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("denoise").required(false),
        };

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_source)
            // DENOISE_SERVICE__OUT_FRAME_RATE becomes service.out_frame_rate
            .add_source(
                config::Environment::with_prefix("DENOISE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(api_key) = env::var(API_KEY_ENV) {
            settings = settings.set_override("service.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> DenoiseResult<()> {
        self.service.validate()
    }

    /// Render the effective configuration as TOML with the credential masked.
    pub fn to_toml_redacted(&self) -> DenoiseResult<String> {
        let printable = AppConfig {
            service: self.service.redacted(),
            logging: self.logging.clone(),
        };
        toml::to_string_pretty(&printable).map_err(|e| DenoiseError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.out_frame_rate, 16000);
        assert_eq!(config.accumulation_window_ms, 140);
        // No credential by default, so validation must fail
        assert!(config.validate().is_err());
        assert!(ServiceConfig::new("key").validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let base = ServiceConfig::new("key");

        assert!(base.clone().with_out_frame_rate(0).validate().is_err());
        assert!(base.clone().with_accumulation_window_ms(5).validate().is_err());
        assert!(base.clone().with_backend_url("http://example.com").validate().is_err());
        assert!(base.clone().with_reconnect_backoff_ms(2000, 1000).validate().is_err());
        assert!(base.clone().with_response_timeout_ms(0).validate().is_err());
        assert!(base.with_backend_url("ws://127.0.0.1:9000").validate().is_ok());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = ServiceConfig::new("super-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_toml_output_masks_key() {
        let config = AppConfig {
            service: ServiceConfig::new("super-secret"),
            logging: LoggingConfig::default(),
        };
        let rendered = config.to_toml_redacted().unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("out_frame_rate = 16000"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("denoise-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("denoise.toml");
        std::fs::write(
            &path,
            "[service]\napi_key = \"file-key\"\nout_frame_rate = 8000\n",
        )
        .unwrap();

        let config = AppConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.service.out_frame_rate, 8000);
        // Untouched fields keep their defaults
        assert_eq!(config.service.accumulation_window_ms, 140);

        std::fs::remove_dir_all(&dir).ok();
    }
}
