//! Configuration module for the BINI connection service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::features::FeatureFlags;

/// Timer settings shared by the heartbeat engine and the synchro-beat ritual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Period of the heartbeat sampling loop
    pub heartbeat_interval: Duration,
    /// Seconds counted down before the breathing stage
    pub countdown_secs: u32,
    /// How long the breathing stage is held
    pub breathing: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2000),
            countdown_secs: 15,
            breathing: Duration::from_secs(15),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Feature flags resolved at startup
    pub features: FeatureFlags,
    /// Heartbeat and ritual timers
    pub timings: Timings,
    /// Synchro sessions idle longer than this are treated as abandoned
    pub synchro_session_ttl: Duration,
    /// Maximum number of serendipity bursts loaded per refresh
    pub burst_limit: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("BINI_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("BINI_DB_PATH")
            .unwrap_or_else(|_| "./data/bini.sqlite".to_string())
            .into();

        let bind_addr = parse_var("BINI_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?;

        let log_level = env::var("BINI_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let features = FeatureFlags::with_disabled(
            env::var("BINI_DISABLED_FEATURES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        );

        let defaults = Timings::default();
        let timings = Timings {
            heartbeat_interval: Duration::from_millis(parse_var(
                "BINI_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            )?),
            countdown_secs: parse_var("BINI_SYNCHRO_COUNTDOWN_SECS", defaults.countdown_secs)?,
            breathing: Duration::from_secs(parse_var(
                "BINI_SYNCHRO_BREATHING_SECS",
                defaults.breathing.as_secs(),
            )?),
        };
        if timings.heartbeat_interval.is_zero() {
            return Err("BINI_HEARTBEAT_INTERVAL_MS must be greater than 0".to_string());
        }

        let synchro_session_ttl =
            Duration::from_secs(parse_var("BINI_SYNCHRO_SESSION_TTL_SECS", 120u64)?);

        let burst_limit = parse_var("BINI_BURST_LIMIT", crate::gateway::DEFAULT_BURST_LIMIT)?;

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            features,
            timings,
            synchro_session_ttl,
            burst_limit,
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("Invalid {} value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
