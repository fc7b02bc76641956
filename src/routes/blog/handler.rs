use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

use crate::{
    AppState,
    access::AccessLevel,
    error::{AppError, AppResult},
    middleware::require_level,
    utils::{Claims, success_to_api_response},
};

use super::model::{
    BlogPost, Comment, CreateCommentRequest, CreatePostRequest, ListQuery, PostDetail, PostPage,
    PostSummary, UpdatePostRequest, validate_comment,
};

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

fn post_not_found(slug: &str) -> AppError {
    AppError::NotFound(format!("Post {slug} not found"))
}

/// 只有作者本人或管理员可以修改文章
fn ensure_can_edit(claims: &Claims, post: &BlogPost) -> AppResult<()> {
    require_level(claims, AccessLevel::BlogAuthor)?;
    if post.is_authored_by(claims.uid) || claims.access_level.allows(AccessLevel::Admin) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only the author can modify this post".into()))
    }
}

async fn published_post(state: &AppState, slug: &str) -> AppResult<BlogPost> {
    BlogPost::find_by_slug(&state.pool, slug)
        .await?
        .filter(|post| post.published)
        .ok_or_else(|| post_not_found(slug))
}

#[axum::debug_handler]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let (page, per_page) = query.resolve();
    let (posts, total) = BlogPost::list_published(&state.pool, page, per_page).await?;

    Ok(success_to_api_response(PostPage {
        posts: posts.iter().map(PostSummary::from).collect(),
        page,
        per_page,
        total,
    }))
}

#[axum::debug_handler]
pub async fn get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<impl IntoResponse> {
    let post = published_post(&state, &slug).await?;
    Ok(success_to_api_response(PostDetail::from(&post)))
}

#[axum::debug_handler]
pub async fn list_drafts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::BlogAuthor)?;

    // 管理员可以看到所有草稿
    let author_filter = if claims.access_level.allows(AccessLevel::Admin) {
        None
    } else {
        Some(claims.uid)
    };
    let drafts = BlogPost::list_drafts(&state.pool, author_filter).await?;

    Ok(success_to_api_response(
        drafts.iter().map(PostSummary::from).collect::<Vec<_>>(),
    ))
}

#[axum::debug_handler]
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::BlogAuthor)?;
    let slug = req.validate()?;

    let post = BlogPost::create(&state.pool, claims.uid, &slug, &req).await?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(PostDetail::from(&post)),
    ))
}

#[axum::debug_handler]
pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
    Json(req): Json<UpdatePostRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let post = BlogPost::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| post_not_found(&slug))?;
    ensure_can_edit(&claims, &post)?;

    let post = BlogPost::update(&state.pool, &slug, &req)
        .await?
        .ok_or_else(|| post_not_found(&slug))?;
    tracing::info!("{} updated blog post {}", claims.sub, slug);

    Ok(success_to_api_response(PostDetail::from(&post)))
}

#[axum::debug_handler]
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
) -> AppResult<impl IntoResponse> {
    let post = BlogPost::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| post_not_found(&slug))?;
    ensure_can_edit(&claims, &post)?;

    let deleted = BlogPost::delete(&state.pool, post.id).await?;
    tracing::info!("{} deleted blog post {}", claims.sub, slug);

    Ok(success_to_api_response(DeletedResponse { deleted }))
}

#[axum::debug_handler]
pub async fn list_comments(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<impl IntoResponse> {
    let post = published_post(&state, &slug).await?;
    let comments = Comment::list_for_post(&state.pool, post.id).await?;
    Ok(success_to_api_response(comments))
}

#[axum::debug_handler]
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(slug): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<impl IntoResponse> {
    require_level(&claims, AccessLevel::Basic)?;
    validate_comment(&req.body)?;

    let post = published_post(&state, &slug).await?;
    let comment = Comment::create(&state.pool, post.id, claims.uid, &req.body).await?;

    Ok((StatusCode::CREATED, success_to_api_response(comment)))
}

#[axum::debug_handler]
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let comment = Comment::find_by_id(&state.pool, comment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Comment {comment_id} not found")))?;

    if comment.author_id != claims.uid && !claims.access_level.allows(AccessLevel::Admin) {
        return Err(AppError::Forbidden(
            "Only the author can delete this comment".into(),
        ));
    }

    let deleted = Comment::delete(&state.pool, comment_id).await?;
    Ok(success_to_api_response(DeletedResponse { deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims(uid: i64, level: AccessLevel) -> Claims {
        Claims {
            sub: format!("user{uid}"),
            uid,
            access_level: level,
            exp: i64::MAX,
            iat: 0,
            iat_ms: 0,
        }
    }

    fn post(author_id: Option<i64>) -> BlogPost {
        BlogPost {
            id: 1,
            slug: "hello".into(),
            title: "Hello".into(),
            summary: None,
            body: "Body".into(),
            author_id,
            author: None,
            published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_author_can_edit_own_post() {
        assert!(ensure_can_edit(&claims(5, AccessLevel::BlogAuthor), &post(Some(5))).is_ok());
    }

    #[test]
    fn test_other_author_cannot_edit() {
        let err = ensure_can_edit(&claims(6, AccessLevel::BlogAuthor), &post(Some(5))).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_admin_can_edit_orphaned_post() {
        assert!(ensure_can_edit(&claims(1, AccessLevel::Admin), &post(None)).is_ok());
    }

    #[test]
    fn test_demoted_author_cannot_edit() {
        assert!(ensure_can_edit(&claims(5, AccessLevel::Gallery), &post(Some(5))).is_err());
    }
}
