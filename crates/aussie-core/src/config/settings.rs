//! Platform configuration (spec §6 "Configuration"). Loaded from a JSON file
//! the same way the teacher's `load_settings` loads `config.json` — same
//! path-traversal guard, same size cap — generalized from a flat router list
//! to the gateway's nested settings tree.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::ratelimit::algorithms::RateLimitAlgorithm;

const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
    pub default_requests_per_window: u32,
    pub default_window_seconds: u64,
    pub default_burst_capacity: u32,
    #[serde(default = "default_true")]
    pub include_headers: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            default_requests_per_window: 100,
            default_window_seconds: 60,
            default_burst_capacity: 100,
            include_headers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: u64,
    pub failed_attempt_window_secs: u64,
    #[serde(default = "default_true")]
    pub track_by_ip: bool,
    #[serde(default = "default_true")]
    pub track_by_identifier: bool,
    pub progressive_multiplier: f64,
    pub max_lockout_duration_secs: u64,
    #[serde(default = "default_true")]
    pub include_headers: bool,
}

impl Default for AuthRateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            lockout_duration_secs: 15 * 60,
            failed_attempt_window_secs: 60 * 60,
            track_by_ip: true,
            track_by_identifier: true,
            progressive_multiplier: 1.5,
            max_lockout_duration_secs: 24 * 60 * 60,
            include_headers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingSettings {
    #[serde(default = "default_true")]
    pub use_rfc7239: bool,
    pub gateway_id: String,
}

impl Default for ForwardingSettings {
    fn default() -> Self {
        Self {
            use_rfc7239: true,
            gateway_id: "aussie-gateway".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsSettings {
    pub max_body_size: u64,
    pub max_header_size: usize,
    pub max_total_headers_size: usize,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_total_headers_size: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSitePolicy,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "aussie_session".to_string(),
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSitePolicy::Lax,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwsSettings {
    pub enabled: bool,
    pub issuer: String,
    pub key_id: String,
    pub ttl_secs: u64,
    pub audience: Option<String>,
    pub include_claims: IncludeClaimsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeClaimsSettings {
    #[serde(default = "default_true")]
    pub roles: bool,
    #[serde(default = "default_true")]
    pub permissions: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub name: bool,
}

impl Default for IncludeClaimsSettings {
    fn default() -> Self {
        Self {
            roles: true,
            permissions: true,
            email: false,
            name: false,
        }
    }
}

impl Default for JwsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: "aussie-gateway".to_string(),
            key_id: "default".to_string(),
            ttl_secs: 5 * 60,
            audience: None,
            include_claims: IncludeClaimsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub enabled: bool,
    pub cookie: CookieSettings,
    pub ttl_secs: u64,
    pub idle_timeout_secs: u64,
    pub sliding_expiration: bool,
    pub jws: JwsSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie: CookieSettings::default(),
            ttl_secs: 60 * 60,
            idle_timeout_secs: 30 * 60,
            sliding_expiration: true,
            jws: JwsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketSettings {
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub max_connections: u32,
    pub ping: PingSettings,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 5 * 60,
            max_lifetime_secs: 24 * 60 * 60,
            max_connections: 10_000,
            ping: PingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResiliencySettings {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpResiliencySettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwksResiliencySettings {
    pub fetch_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub max_cache_entries: usize,
}

impl Default for JwksResiliencySettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 5,
            cache_ttl_secs: 60 * 60,
            max_cache_entries: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisResiliencySettings {
    pub operation_timeout_secs: u64,
}

impl Default for RedisResiliencySettings {
    fn default() -> Self {
        Self {
            operation_timeout_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResiliencySettings {
    pub http: HttpResiliencySettings,
    pub jwks: JwksResiliencySettings,
    pub redis: RedisResiliencySettings,
}

impl Default for ResiliencySettings {
    fn default() -> Self {
        Self {
            http: HttpResiliencySettings::default(),
            jwks: JwksResiliencySettings::default(),
            redis: RedisResiliencySettings::default(),
        }
    }
}

/// Top-level gateway configuration (spec §6). `dangerous_noop`, when true,
/// makes authentication always succeed with an admin principal — refused at
/// startup in production mode (see `validate_startup_safety`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AussieSettings {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub auth_rate_limit: AuthRateLimitSettings,
    #[serde(default)]
    pub forwarding: ForwardingSettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub resiliency: ResiliencySettings,
    #[serde(default)]
    pub dangerous_noop: bool,
    #[serde(default)]
    pub production: bool,
}

impl Default for AussieSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings::default(),
            auth_rate_limit: AuthRateLimitSettings::default(),
            forwarding: ForwardingSettings::default(),
            limits: LimitsSettings::default(),
            session: SessionSettings::default(),
            websocket: WebSocketSettings::default(),
            resiliency: ResiliencySettings::default(),
            dangerous_noop: false,
            production: false,
        }
    }
}

impl AussieSettings {
    pub fn websocket_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.websocket.idle_timeout_secs)
    }

    pub fn websocket_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.websocket.max_lifetime_secs)
    }

    /// Refuses a dangerous dev bypass in production, per spec §6.
    pub fn validate_startup_safety(&self) -> Result<(), String> {
        if self.dangerous_noop {
            if self.production {
                return Err(
                    "dangerousNoop is enabled while production=true; refusing to start"
                        .to_string(),
                );
            }
            warn!("dangerousNoop is enabled: every request will authenticate as an admin principal");
        }
        Ok(())
    }
}

/// Loads configuration from the path in `AUSSIE_CONFIG_PATH`, defaulting to
/// `./config.json`. Mirrors the teacher's `load_settings`: resolve to an
/// absolute path, reject anything outside the working directory, cap the
/// file size, then parse.
pub fn load_settings() -> Result<AussieSettings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("AUSSIE_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading configuration from {config_path}");

    let path = Path::new(&config_path);
    if !path.exists() {
        debug!("no config file at {config_path}, using defaults");
        return Ok(AussieSettings::default());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{config_path}': {e}"))?;
    let current_dir =
        std::env::current_dir().map_err(|e| format!("cannot get current directory: {e}"))?;
    if !canonical_path.starts_with(&current_dir) {
        warn!("config path '{config_path}' is outside the working directory");
        return Err("config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("cannot read config file metadata: {e}"))?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max {MAX_CONFIG_FILE_SIZE})",
            metadata.len()
        )
        .into());
    }

    let raw = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("cannot read config file: {e}"))?;
    let settings: AussieSettings =
        serde_json::from_str(&raw).map_err(|e| format!("invalid config JSON: {e}"))?;

    settings.validate_startup_safety()?;

    debug!("configuration loaded successfully");
    Ok(settings)
}
