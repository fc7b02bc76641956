use axum::{
    extract::{Extension, Json, State},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::{
    AppState,
    access::AccessLevel,
    cache::{InviteCacheOperations, TokenCacheOperations},
    config::RegistrationMode,
    error::{AppError, AppResult},
    middleware::{SESSION_COOKIE, SessionToken},
    utils::{Claims, generate_token, safe_redirect, success_to_api_response},
};

use super::model::{
    ChangePasswordRequest, ChangePasswordResponse, LoginRequest, LoginResponse, LogoutResponse,
    RefreshTokenResponse, RegisterRequest, RegisterResponse, ResetPasswordRequest,
    ResetPasswordResponse, User, UserInfo, validate_password, validate_username,
};

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(!cfg!(debug_assertions))
        .build()
}

fn issue_token(user: &User, state: &AppState) -> AppResult<(String, i64)> {
    Ok(generate_token(
        user.id,
        &user.username,
        user.level(),
        &state.config,
    )?)
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    if state.config.registration_mode == RegistrationMode::Closed {
        return Err(AppError::RegistrationClosed);
    }

    let username = req.username.trim();
    validate_username(username)?;
    validate_password(&req.password)?;

    let invite_code = req.invite_code.as_deref().map(str::trim).filter(|c| !c.is_empty());

    // 邀请码决定新用户的访问级别；开放注册时默认为 basic
    let invite = match invite_code {
        Some(code) => Some(
            InviteCacheOperations::take_invite(&state.redis, code)
                .await?
                .ok_or_else(|| AppError::Forbidden("Invalid or expired invite code".into()))?,
        ),
        None if state.config.registration_mode == RegistrationMode::Invite => {
            return Err(AppError::Validation("An invite code is required".into()));
        }
        None => None,
    };
    let access_level = invite
        .as_ref()
        .map_or(AccessLevel::Basic, |invite| invite.access_level);

    let (user, recovery_code) =
        match User::create(&state.pool, username, &req.password, access_level).await {
            Ok(created) => created,
            Err(e) => {
                if let Some(invite) = &invite {
                    if let Err(restore_err) =
                        InviteCacheOperations::restore_invite(&state.redis, invite).await
                    {
                        tracing::warn!("Failed to restore invite {}: {}", invite.code, restore_err);
                    }
                }
                return Err(e);
            }
        };

    let (token, expires_at) = issue_token(&user, &state)?;

    Ok((
        jar.add(session_cookie(token.clone())),
        success_to_api_response(RegisterResponse {
            user: UserInfo::from(&user),
            token,
            expires_at,
            recovery_code,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    const INVALID_CREDENTIALS: &str = "Invalid credentials";

    let Some(user) = User::find_by_username(&state.pool, req.username.trim()).await? else {
        User::verify_against_dummy(&req.password);
        tracing::debug!("Login failed: unknown user {}", req.username);
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    // 验证密码
    if !user.verify_login(&req.password)? {
        tracing::debug!("Login failed: wrong password for {}", user.username);
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let (token, expires_at) = issue_token(&user, &state)?;
    tracing::info!("User {} logged in", user.username);

    Ok((
        jar.add(session_cookie(token.clone())),
        success_to_api_response(LoginResponse {
            user: UserInfo::from(&user),
            token,
            expires_at,
            redirect_to: safe_redirect(req.next.as_deref()),
        }),
    ))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    TokenCacheOperations::revoke_token(&state.redis, &token, &claims).await?;
    tracing::info!("User {} logged out", claims.sub);

    Ok((
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        success_to_api_response(LogoutResponse {
            redirect_to: "/".into(),
        }),
    ))
}

#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    let user = User::find_by_id(&state.pool, claims.uid)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(success_to_api_response(UserInfo::from(&user)))
}

#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<impl IntoResponse> {
    validate_password(&req.new_password)?;

    let user = User::find_by_id(&state.pool, claims.uid)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if !user.verify_login(&req.current_password)? {
        return Err(AppError::Unauthorized("Current password is incorrect".into()));
    }

    let (user, recovery_code) =
        User::update_password(&state.pool, user.id, &req.new_password).await?;

    // 旧令牌全部失效，再签发新令牌
    TokenCacheOperations::invalidate_user_tokens(
        &state.redis,
        user.id,
        state.config.jwt_expiration().as_secs(),
    )
    .await?;
    let (token, expires_at) = issue_token(&user, &state)?;

    Ok((
        jar.add(session_cookie(token.clone())),
        success_to_api_response(ChangePasswordResponse {
            token,
            expires_at,
            recovery_code,
        }),
    ))
}

#[axum::debug_handler]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<impl IntoResponse> {
    const INVALID_RECOVERY: &str = "Invalid username or recovery code";

    validate_password(&req.new_password)?;

    let Some(user) = User::find_by_username(&state.pool, req.username.trim()).await? else {
        User::verify_against_dummy(&req.recovery_code);
        return Err(AppError::Unauthorized(INVALID_RECOVERY.into()));
    };

    if !user.verify_recovery_code(&req.recovery_code)? {
        tracing::info!("Invalid recovery code for {}", user.username);
        return Err(AppError::Unauthorized(INVALID_RECOVERY.into()));
    }

    let (user, recovery_code) =
        User::update_password(&state.pool, user.id, &req.new_password).await?;
    TokenCacheOperations::invalidate_user_tokens(
        &state.redis,
        user.id,
        state.config.jwt_expiration().as_secs(),
    )
    .await?;
    tracing::info!("Password reset for {}", user.username);

    Ok(success_to_api_response(ResetPasswordResponse { recovery_code }))
}

/// 重新读取用户，新令牌携带当前的访问级别
#[axum::debug_handler]
pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    let user = User::find_by_id(&state.pool, claims.uid)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;

    let (token, expires_at) = issue_token(&user, &state)?;

    Ok((
        jar.add(session_cookie(token.clone())),
        success_to_api_response(RefreshTokenResponse {
            token,
            expires_at,
            access_level: user.level(),
        }),
    ))
}
