use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub leave: LeaveConfig,
    #[serde(default)]
    pub students: StudentsConfig,
    #[serde(default)]
    pub tally: TallyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding the built front-end, served as an SPA fallback
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Static API token accepted in place of a session token
    #[serde(default = "default_admin_token")]
    pub admin_token: String,
    /// Username of the bootstrap admin created on an empty database
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: default_admin_token(),
            admin_username: default_admin_username(),
            admin_password: default_admin_password(),
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

fn default_admin_token() -> String {
    // Generate a random token if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_session_ttl_hours() -> i64 {
    168
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Monthly leave activator settings
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between activator cycles (default: 60)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Offset of the wall clock leave dates are entered in (default: +05:30)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for LeaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

impl LeaveConfig {
    /// Real-world offsets run from UTC-12:00 to UTC+14:00
    pub const OFFSET_RANGE_MINUTES: std::ops::RangeInclusive<i32> = -720..=840;

    /// The configured offset. [`Config::load`] rejects out-of-range values,
    /// so the UTC fallback only covers hand-built configs.
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_utc_offset_minutes() -> i32 {
    330
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentsConfig {
    /// How long a cached student listing stays fresh
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for StudentsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct TallyConfig {
    #[serde(default = "default_rupees_per_unit")]
    pub rupees_per_unit: i64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            rupees_per_unit: default_rupees_per_unit(),
        }
    }
}

fn default_rupees_per_unit() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Login attempts allowed per client IP per window
    #[serde(default = "default_login_requests")]
    pub login_requests_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: default_window_seconds(),
            login_requests_per_window: default_login_requests(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_login_requests() -> u32 {
    20
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    fn validate(&self) -> Result<()> {
        let minutes = self.leave.utc_offset_minutes;
        if !LeaveConfig::OFFSET_RANGE_MINUTES.contains(&minutes) {
            anyhow::bail!(
                "leave.utc_offset_minutes must be between {} and {}, got {}",
                LeaveConfig::OFFSET_RANGE_MINUTES.start(),
                LeaveConfig::OFFSET_RANGE_MINUTES.end(),
                minutes
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/hostelpass.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.leave.poll_interval_seconds, 60);
        assert_eq!(config.tally.rupees_per_unit, 10);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\n\n[leave]\nutc_offset_minutes = 0\n\n[tally]\nrupees_per_unit = 25"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.leave.utc_offset_minutes, 0);
        assert!(config.leave.enabled);
        assert_eq!(config.tally.rupees_per_unit, 25);
        assert_eq!(config.auth.admin_username, "admin");
    }

    #[test]
    fn test_leave_offset() {
        let leave = LeaveConfig::default();
        assert_eq!(leave.offset().local_minus_utc(), 330 * 60);

        let bogus = LeaveConfig {
            utc_offset_minutes: 100_000,
            ..LeaveConfig::default()
        };
        assert_eq!(bogus.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_out_of_range_utc_offset_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[leave]\nutc_offset_minutes = 2147483647").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("utc_offset_minutes"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[leave]\nutc_offset_minutes = -300").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.leave.offset().local_minus_utc(), -300 * 60);
    }
}
