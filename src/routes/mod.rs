pub mod admin;
pub mod blog;
pub mod gallery;
pub mod site;
pub mod user;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::{AppState, middleware::auth_middleware};

/// 不需要登录的接口
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(site::health))
        // 用户
        .route("/users/register", post(user::register))
        .route("/users/login", post(user::login))
        .route("/users/reset-password", post(user::reset_password))
        // 博客
        .route("/blog/posts", get(blog::list_posts))
        .route("/blog/posts/{slug}", get(blog::get_post))
        .route("/blog/posts/{slug}/comments", get(blog::list_comments))
        // 公开相册
        .route("/gallery/public", get(gallery::list_public))
        .route("/gallery/public/{name}", get(gallery::public_image))
}

/// 需要登录的接口，权限级别在各处理函数中校验
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // 用户
        .route("/users/logout", post(user::logout))
        .route("/users/me", get(user::me))
        .route("/users/password", put(user::change_password))
        .route("/users/refresh-token", post(user::refresh_token))
        // 博客
        .route("/blog/drafts", get(blog::list_drafts))
        .route("/blog/posts", post(blog::create_post))
        .route(
            "/blog/posts/{slug}",
            put(blog::update_post).delete(blog::delete_post),
        )
        .route("/blog/posts/{slug}/comments", post(blog::create_comment))
        .route("/blog/comments/{id}", delete(blog::delete_comment))
        // 私密相册与图片管理
        .route("/gallery/private", get(gallery::list_private))
        .route("/gallery/private/{name}", get(gallery::private_image))
        .route(
            "/gallery/images/{visibility}",
            post(gallery::upload_image).layer(gallery::upload_body_limit(&state.config)),
        )
        .route(
            "/gallery/images/{visibility}/{name}",
            delete(gallery::delete_image),
        )
        // 用户管理
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{username}", delete(admin::delete_user))
        .route("/admin/users/{username}/access", put(admin::grant_access))
        .route("/admin/invites", post(admin::create_invite))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(public_routes())
        .merge(protected_routes(state))
}
