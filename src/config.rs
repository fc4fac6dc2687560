use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::tracker::TrackerSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub dispatch_url: String,
    pub api_base_url: String,
    pub status_port: u16,
    pub log_level: String,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub location_wait_secs: u64,
    pub location_poll_ms: u64,
    pub distance_filter_m: f64,
    pub dispatch_handshake_auth: bool,
    pub credentials_path: PathBuf,
    pub event_buffer_size: usize,
    pub location_track_file: Option<PathBuf>,
    pub location_replay_ms: u64,
    pub driver_phone: Option<String>,
    pub driver_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            dispatch_url: env::var("DISPATCH_URL")
                .unwrap_or_else(|_| "wss://deliveryshop.cloud".to_string()),
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "https://deliveryshop.cloud/api".to_string()),
            status_port: parse_or_default("STATUS_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            heartbeat_interval_secs: parse_or_default("HEARTBEAT_INTERVAL_SECS", 30)?,
            reconnect_delay_secs: parse_or_default("RECONNECT_DELAY_SECS", 5)?,
            location_wait_secs: parse_or_default("LOCATION_WAIT_SECS", 10)?,
            location_poll_ms: parse_or_default("LOCATION_POLL_MS", 500)?,
            distance_filter_m: parse_or_default("DISTANCE_FILTER_M", 40.0)?,
            dispatch_handshake_auth: parse_or_default("DISPATCH_HANDSHAKE_AUTH", false)?,
            credentials_path: env::var("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".driver-credentials.json")),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            location_track_file: env::var("LOCATION_TRACK_FILE").ok().map(PathBuf::from),
            location_replay_ms: parse_or_default("LOCATION_REPLAY_MS", 5000)?,
            driver_phone: env::var("DRIVER_PHONE").ok(),
            driver_password: env::var("DRIVER_PASSWORD").ok(),
        })
    }

    pub fn tracker_settings(&self, auth_token: Option<String>) -> TrackerSettings {
        TrackerSettings {
            dispatch_url: self.dispatch_url.clone(),
            handshake_token: auth_token.filter(|_| self.dispatch_handshake_auth),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            location_wait: Duration::from_secs(self.location_wait_secs),
            location_poll: Duration::from_millis(self.location_poll_ms),
            distance_filter_m: self.distance_filter_m,
            event_buffer_size: self.event_buffer_size,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))
}
