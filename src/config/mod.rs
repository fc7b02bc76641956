use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(&'static str, String),
}

/// 注册方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    Open,
    Invite,
    Closed,
}

impl std::str::FromStr for RegistrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(RegistrationMode::Open),
            "invite" => Ok(RegistrationMode::Invite),
            "closed" => Ok(RegistrationMode::Closed),
            other => Err(format!("expected open, invite or closed, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub registration_mode: RegistrationMode,
    pub invite_expiration_secs: u64,
    pub static_dir: PathBuf,
    pub gallery_dir: PathBuf,
    pub gallery_max_upload_bytes: usize,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源构建配置，便于测试
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnvVar(key))
        };

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::InvalidEnvVar(
                "JWT_SECRET",
                format!("must be at least {MIN_JWT_SECRET_LENGTH} bytes"),
            ));
        }

        let mut api_base_uri = lookup("API_BASE_URI").unwrap_or_else(|| "/api".into());
        if !api_base_uri.starts_with('/') {
            api_base_uri.insert(0, '/');
        }
        let api_base_uri = api_base_uri.trim_end_matches('/').to_string();
        if api_base_uri.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "API_BASE_URI",
                "must not be the root path".into(),
            ));
        }

        let registration_mode = match lookup("REGISTRATION_MODE") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::InvalidEnvVar("REGISTRATION_MODE", e))?,
            None => RegistrationMode::Invite,
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            jwt_secret,
            jwt_expiration_secs: parse_hours(&lookup, "JWT_EXPIRATION", 24)? * 3600,
            rate_limit_window_secs: parse_or(&lookup, "RATE_LIMIT_WINDOW", 60)?,
            rate_limit_requests: parse_or(&lookup, "RATE_LIMIT_REQUESTS", 100)?,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_or(&lookup, "SERVER_PORT", 5000)?,
            api_base_uri,
            registration_mode,
            invite_expiration_secs: parse_hours(&lookup, "INVITE_EXPIRATION", 72)? * 3600,
            static_dir: lookup("STATIC_DIR")
                .unwrap_or_else(|| "frontend".into())
                .into(),
            gallery_dir: lookup("GALLERY_DIR")
                .unwrap_or_else(|| "gallery".into())
                .into(),
            gallery_max_upload_bytes: parse_or(&lookup, "GALLERY_MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            admin_username: lookup("ADMIN_USERNAME").filter(|v| !v.is_empty()),
            admin_password: lookup("ADMIN_PASSWORD").filter(|v| !v.is_empty()),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn invite_expiration(&self) -> Duration {
        Duration::from_secs(self.invite_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar(key, raw)),
        None => Ok(default),
    }
}

/// 支持 "24" 或 "24h" 两种写法
fn parse_hours<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .trim_end_matches('h')
            .parse::<u64>()
            .ok()
            .filter(|hours| *hours > 0)
            .ok_or(ConfigError::InvalidEnvVar(key, raw)),
        None => Ok(default),
    }
}
