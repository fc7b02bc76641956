use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::access::AccessLevel;
use crate::error::{AppError, AppResult};
use crate::utils::{generate_recovery_code, hash_password, verify_password};

const USER_COLUMNS: &str =
    "id, username, password_hash, recovery_hash, access_level, created_at, updated_at";

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 32;
const PASSWORD_MIN_LEN: usize = 8;
// bcrypt 只使用前 72 字节
const PASSWORD_MAX_LEN: usize = 72;

/// 用户不存在时也做一次哈希校验，避免通过响应时间判断用户名是否存在
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("timing-equaliser").ok());

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub recovery_hash: Option<String>,
    pub access_level: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 对外返回的用户信息，不含任何哈希
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            access_level: user.level(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserInfo,
    pub token: String,
    pub expires_at: i64,
    pub recovery_code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserInfo,
    pub token: String,
    pub expires_at: i64,
    pub redirect_to: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub redirect_to: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub token: String,
    pub expires_at: i64,
    pub recovery_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub username: String,
    pub recovery_code: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub recovery_code: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub token: String,
    pub expires_at: i64,
    pub access_level: AccessLevel,
}

pub fn validate_username(username: &str) -> AppResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(AppError::Validation(format!(
            "Username must be between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.len()) {
        return Err(AppError::Validation(format!(
            "Password must be between {PASSWORD_MIN_LEN} and {PASSWORD_MAX_LEN} bytes"
        )));
    }
    Ok(())
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("User already exists".into())
        }
        _ => AppError::Database(e),
    }
}

impl User {
    pub fn level(&self) -> AccessLevel {
        AccessLevel::from_label(&self.access_level)
    }

    /// 创建用户，返回用户和明文找回码（只会出现这一次）
    pub async fn create(
        pool: &PgPool,
        username: &str,
        password: &str,
        access_level: AccessLevel,
    ) -> AppResult<(Self, String)> {
        let password_hash = hash_password(password)?;
        let recovery_code = generate_recovery_code();
        let recovery_hash = hash_password(&recovery_code)?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, password_hash, recovery_hash, access_level)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(password_hash)
        .bind(recovery_hash)
        .bind(access_level.as_str())
        .fetch_one(pool)
        .await
        .map_err(map_unique_violation)?;

        tracing::info!("Created user {} with level {}", user.username, access_level);
        Ok((user, recovery_code))
    }

    pub async fn find_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(pool)
        .await
    }

    /// 调整用户访问级别，用户不存在时返回 None
    pub async fn grant_access(
        pool: &PgPool,
        username: &str,
        access_level: AccessLevel,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET access_level = $1, updated_at = NOW()
            WHERE username = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(access_level.as_str())
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    /// 修改密码并轮换找回码
    pub async fn update_password(
        pool: &PgPool,
        id: i64,
        new_password: &str,
    ) -> AppResult<(Self, String)> {
        let password_hash = hash_password(new_password)?;
        let recovery_code = generate_recovery_code();
        let recovery_hash = hash_password(&recovery_code)?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $1, recovery_hash = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(password_hash)
        .bind(recovery_hash)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        Ok((user, recovery_code))
    }

    pub async fn delete(pool: &PgPool, username: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 启动时创建管理员账号，已存在则不做任何修改
    pub async fn ensure_admin(pool: &PgPool, username: &str, password: &str) -> AppResult<()> {
        if Self::find_by_username(pool, username).await?.is_some() {
            tracing::debug!("Bootstrap admin {} already exists", username);
            return Ok(());
        }
        validate_username(username)?;
        validate_password(password)?;

        match Self::create(pool, username, password, AccessLevel::Admin).await {
            Ok(_) => {
                tracing::info!("Bootstrap admin {} created", username);
                Ok(())
            }
            // 多实例同时启动时可能已被其他实例创建
            Err(AppError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn verify_login(&self, password: &str) -> Result<bool, bcrypt::BcryptError> {
        verify_password(password, &self.password_hash)
    }

    pub fn verify_recovery_code(&self, code: &str) -> Result<bool, bcrypt::BcryptError> {
        match &self.recovery_hash {
            Some(hash) => verify_password(code.trim(), hash),
            None => Ok(false),
        }
    }

    /// 用户不存在时调用，消耗与正常校验相近的时间
    pub fn verify_against_dummy(password: &str) {
        if let Some(hash) = DUMMY_HASH.as_ref() {
            let _ = verify_password(password, hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(password: &str, recovery: Option<&str>, level: &str) -> User {
        User {
            id: 1,
            username: "dana".into(),
            password_hash: hash_password(password).unwrap(),
            recovery_hash: recovery.map(|code| hash_password(code).unwrap()),
            access_level: level.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("a-b").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("ünïcode").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("1234567").is_err());
        assert!(validate_password(&"p".repeat(73)).is_err());
    }

    #[test]
    fn test_verify_login_and_recovery() {
        let user = user_with("hunter2hunter2", Some("abc123"), "gallery");
        assert!(user.verify_login("hunter2hunter2").unwrap());
        assert!(!user.verify_login("hunter3hunter3").unwrap());
        assert!(user.verify_recovery_code(" abc123 ").unwrap());
        assert!(!user.verify_recovery_code("abc124").unwrap());
    }

    #[test]
    fn test_missing_recovery_hash_never_matches() {
        let user = user_with("hunter2hunter2", None, "basic");
        assert!(!user.verify_recovery_code("anything").unwrap());
    }

    #[test]
    fn test_unknown_stored_level_is_public() {
        let user = user_with("hunter2hunter2", None, "superuser");
        assert_eq!(user.level(), AccessLevel::Public);
        assert_eq!(UserInfo::from(&user).access_level, AccessLevel::Public);
    }
}
