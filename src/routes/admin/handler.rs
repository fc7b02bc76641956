use axum::{
    extract::{Extension, Json, Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    access::AccessLevel,
    cache::{CachedInvite, InviteCacheOperations, TokenCacheOperations},
    error::{AppError, AppResult},
    middleware::require_level,
    routes::user::{User, UserInfo},
    utils::{Claims, success_to_api_response},
};

#[derive(Debug, Deserialize)]
pub struct GrantAccessRequest {
    pub access_level: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInviteRequest {
    pub access_level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InviteInfo {
    pub code: String,
    pub access_level: AccessLevel,
    pub expires_at: i64,
}

impl From<CachedInvite> for InviteInfo {
    fn from(invite: CachedInvite) -> Self {
        Self {
            code: invite.code,
            access_level: invite.access_level,
            expires_at: invite.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub username: String,
}

/// 管理员指定级别时必须是已知标签，避免拼写错误把用户降为 public
fn parse_level(label: &str) -> AppResult<AccessLevel> {
    AccessLevel::parse(label.trim())
        .ok_or_else(|| AppError::Validation(format!("Unknown access level: {label}")))
}

/// 邀请默认授予 basic，不允许通过邀请创建管理员
fn invite_level(label: Option<&str>) -> AppResult<AccessLevel> {
    let level = match label {
        Some(label) => parse_level(label)?,
        None => AccessLevel::Basic,
    };
    if level == AccessLevel::Admin {
        return Err(AppError::Validation(
            "Admin accounts cannot be created by invite".into(),
        ));
    }
    Ok(level)
}

#[axum::debug_handler]
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::Admin)?;

    let users = User::list(&state.pool).await?;
    let users: Vec<UserInfo> = users.iter().map(UserInfo::from).collect();
    Ok(success_to_api_response(users))
}

#[axum::debug_handler]
pub async fn grant_access(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
    Json(req): Json<GrantAccessRequest>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::Admin)?;
    let level = parse_level(&req.access_level)?;

    if username == claims.sub && level != AccessLevel::Admin {
        return Err(AppError::Validation(
            "Admins cannot lower their own access level".into(),
        ));
    }

    let user = User::grant_access(&state.pool, &username, level)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {username} not found")))?;

    // 已签发的令牌中带着旧级别，使其失效
    TokenCacheOperations::invalidate_user_tokens(
        &state.redis,
        user.id,
        state.config.jwt_expiration().as_secs(),
    )
    .await?;
    tracing::info!("{} set access level of {} to {}", claims.sub, username, level);

    Ok(success_to_api_response(UserInfo::from(&user)))
}

#[axum::debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::Admin)?;

    if username == claims.sub {
        return Err(AppError::Validation("Admins cannot delete themselves".into()));
    }

    let user = User::find_by_username(&state.pool, &username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {username} not found")))?;

    if User::delete(&state.pool, &username).await? {
        TokenCacheOperations::invalidate_user_tokens(
            &state.redis,
            user.id,
            state.config.jwt_expiration().as_secs(),
        )
        .await?;
        tracing::info!("{} deleted user {}", claims.sub, username);
    }

    Ok(success_to_api_response(DeleteUserResponse { username }))
}

#[axum::debug_handler]
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<CreateInviteRequest>>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::Admin)?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let level = invite_level(req.access_level.as_deref())?;

    let invite = InviteCacheOperations::create_invite(
        &state.redis,
        level,
        &claims.sub,
        state.config.invite_expiration().as_secs(),
    )
    .await?;

    Ok(success_to_api_response(InviteInfo::from(invite)))
}
