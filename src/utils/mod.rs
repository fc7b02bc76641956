use axum::Json;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::access::AccessLevel;
use crate::config::Config;
use crate::result::ApiResponse;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,               // 用户名
    pub uid: i64,                  // 用户ID
    pub access_level: AccessLevel, // 签发时的访问级别
    pub exp: i64,                  // 过期时间
    pub iat: i64,                  // 签发时间
    #[serde(default)]
    pub iat_ms: i64, // 签发时间（毫秒），与用户失效起点比较
}

pub fn generate_token(
    user_id: i64,
    username: &str,
    access_level: AccessLevel,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let issued_at = Utc::now();
    let now = issued_at.timestamp();
    let expiration = now.saturating_add(config.jwt_expiration().as_secs() as i64);

    let claims = Claims {
        sub: username.to_string(),
        uid: user_id,
        access_level,
        exp: expiration,
        iat: now,
        iat_ms: issued_at.timestamp_millis(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    tracing::debug!("Generated token for user: {}", username);
    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// 生成一次性找回码，只返回给用户一次，库里只存哈希
pub fn generate_recovery_code() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 令牌摘要，用作缓存键，避免把原始令牌写进 Redis
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// 登录后跳转地址只允许站内路径
pub fn safe_redirect(next: Option<&str>) -> String {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const CONFLICT: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const REGISTRATION_CLOSED: i32 = 1006;
    pub const PAYLOAD_TOO_LARGE: i32 = 1007;
    pub const INTERNAL_ERROR: i32 = 5000;
}
