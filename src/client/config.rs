use std::env;
use std::time::Duration;

use log::info;
use url::Url;

use crate::common::models::Device;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8765";
pub const DEFAULT_EVENTS_PATH: &str = "/events";
/// Largest accepted event buffer; bigger settings are clamped.
pub const MAX_EVENT_BUFFER: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub backend_url: String,
    pub events_path: String,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub status_poll_interval: Duration,
    pub request_timeout: Duration,
    pub event_buffer_size: usize,
    pub default_device: Device,
    pub default_realtime: bool,
    pub default_output_dir: Option<String>,
    pub auto_check_connection: bool,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            events_path: DEFAULT_EVENTS_PATH.to_string(),
            reconnect_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(600),
            event_buffer_size: 100,
            default_device: Device::default(),
            default_realtime: false,
            default_output_dir: None,
            auto_check_connection: true,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok());
        info!("[CONFIG] Backend: {}", config.backend_url);
        info!("[CONFIG] Event stream: {}", config.events_url().unwrap_or_else(|e| e));
        config
    }

    /// Build from any key lookup; unset or unparseable values keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        let flag = |key: &str, fallback: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(fallback)
        };

        Self {
            backend_url: lookup("SUPERNOTE_BACKEND_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.backend_url),
            events_path: lookup("SUPERNOTE_EVENTS_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.events_path),
            reconnect_delay: secs("SUPERNOTE_RECONNECT_DELAY_SECS", defaults.reconnect_delay),
            handshake_timeout: secs("SUPERNOTE_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout),
            status_poll_interval: secs("SUPERNOTE_STATUS_POLL_SECS", defaults.status_poll_interval),
            request_timeout: secs("SUPERNOTE_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            event_buffer_size: lookup("SUPERNOTE_EVENT_BUFFER")
                .and_then(|v| v.trim().parse().ok())
                .filter(|v: &usize| *v > 0)
                .map(|v| v.min(MAX_EVENT_BUFFER))
                .unwrap_or(defaults.event_buffer_size),
            default_device: lookup("SUPERNOTE_DEFAULT_DEVICE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_device),
            default_realtime: flag("SUPERNOTE_DEFAULT_REALTIME", defaults.default_realtime),
            default_output_dir: lookup("SUPERNOTE_DEFAULT_OUTPUT_DIR").filter(|v| !v.trim().is_empty()),
            auto_check_connection: flag("SUPERNOTE_AUTO_CHECK", defaults.auto_check_connection),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// WebSocket URL of the event stream, derived from the backend URL.
    pub fn events_url(&self) -> Result<String, String> {
        let mut url = Url::parse(&self.backend_url).map_err(|e| format!("invalid backend URL '{}': {}", self.backend_url, e))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(format!("unsupported backend scheme '{}'", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| format!("cannot derive event stream URL from '{}'", self.backend_url))?;
        let base = url.path().trim_end_matches('/').to_string();
        let path = format!("{}/{}", base, self.events_path.trim_start_matches('/'));
        url.set_path(&path);
        Ok(url.to_string())
    }
}
