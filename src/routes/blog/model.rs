//! Blog posts and comments.
//!
//! Posts are stored as Markdown and rendered to HTML on read. The slug is
//! derived from the title at creation time and never changes afterwards, so
//! links stay stable when a post is retitled.

use chrono::{DateTime, Utc};
use comrak::{Options, markdown_to_html};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};

const SLUG_MAX_LEN: usize = 80;
const TITLE_MAX_LEN: usize = 200;
const SUMMARY_MAX_LEN: usize = 500;
const BODY_MAX_LEN: usize = 100_000;
pub const COMMENT_MAX_LEN: usize = 2000;
const WORDS_PER_MINUTE: usize = 200;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 50;

const POST_SELECT: &str = r#"
    SELECT p.id, p.slug, p.title, p.summary, p.body, p.author_id,
           u.username AS author, p.published, p.created_at, p.updated_at
"#;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.post_id, c.author_id, u.username AS author, c.body, c.created_at
"#;

#[derive(Debug, Clone, FromRow)]
pub struct BlogPost {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub author_id: Option<i64>,
    pub author: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    #[serde(skip_serializing)]
    pub author_id: i64,
    pub author: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PostSummary {
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reading_time_minutes: u32,
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub body_markdown: String,
    pub content_html: String,
}

#[derive(Debug, Serialize)]
pub struct PostPage {
    pub posts: Vec<PostSummary>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListQuery {
    /// 页码从 1 开始，每页数量限制在 1..=50
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub published: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
}

/// Derives a URL slug: lowercase ASCII alphanumerics separated by single
/// hyphens, at most 80 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }

    slug.truncate(SLUG_MAX_LEN);
    slug.trim_end_matches('-').to_string()
}

pub fn render_markdown(content: &str) -> String {
    let mut options = Options::default();

    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;

    // 原始 HTML 一律转义，评论和文章都不允许注入标签
    options.render.r#unsafe = false;

    markdown_to_html(content, &options)
}

pub fn reading_time_minutes(content: &str) -> u32 {
    let words = content.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

fn validate_title(title: &str) -> AppResult<()> {
    let len = title.trim().chars().count();
    if len == 0 || len > TITLE_MAX_LEN {
        return Err(AppError::Validation(format!(
            "Title must be between 1 and {TITLE_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_summary(summary: Option<&str>) -> AppResult<()> {
    if summary.is_some_and(|s| s.chars().count() > SUMMARY_MAX_LEN) {
        return Err(AppError::Validation(format!(
            "Summary must be at most {SUMMARY_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_body(body: &str) -> AppResult<()> {
    if body.trim().is_empty() || body.chars().count() > BODY_MAX_LEN {
        return Err(AppError::Validation(format!(
            "Body must be between 1 and {BODY_MAX_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_comment(body: &str) -> AppResult<()> {
    let len = body.trim().chars().count();
    if len == 0 || len > COMMENT_MAX_LEN {
        return Err(AppError::Validation(format!(
            "Comment must be between 1 and {COMMENT_MAX_LEN} characters"
        )));
    }
    Ok(())
}

impl CreatePostRequest {
    pub fn validate(&self) -> AppResult<String> {
        validate_title(&self.title)?;
        validate_summary(self.summary.as_deref())?;
        validate_body(&self.body)?;

        let slug = slugify(&self.title);
        if slug.is_empty() {
            return Err(AppError::Validation(
                "Title must contain at least one letter or digit".into(),
            ));
        }
        Ok(slug)
    }
}

impl UpdatePostRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        validate_summary(self.summary.as_deref())?;
        if let Some(body) = &self.body {
            validate_body(body)?;
        }
        Ok(())
    }
}

impl From<&BlogPost> for PostSummary {
    fn from(post: &BlogPost) -> Self {
        Self {
            slug: post.slug.clone(),
            title: post.title.clone(),
            summary: post.summary.clone(),
            author: post.author.clone(),
            published: post.published,
            created_at: post.created_at,
            updated_at: post.updated_at,
            reading_time_minutes: reading_time_minutes(&post.body),
        }
    }
}

impl From<&BlogPost> for PostDetail {
    fn from(post: &BlogPost) -> Self {
        Self {
            summary: PostSummary::from(post),
            body_markdown: post.body.clone(),
            content_html: render_markdown(&post.body),
        }
    }
}

impl BlogPost {
    pub fn is_authored_by(&self, user_id: i64) -> bool {
        self.author_id == Some(user_id)
    }

    /// 已发布文章，按发布时间倒序
    pub async fn list_published(
        pool: &PgPool,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let offset = i64::from(page - 1) * i64::from(per_page);

        let posts = sqlx::query_as::<_, BlogPost>(&format!(
            r#"
            {POST_SELECT}
            FROM blog_posts p
            LEFT JOIN users u ON u.id = p.author_id
            WHERE p.published
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blog_posts WHERE published")
            .fetch_one(pool)
            .await?;

        Ok((posts, total))
    }

    /// 草稿列表；author_id 为 None 时返回全部草稿
    pub async fn list_drafts(
        pool: &PgPool,
        author_id: Option<i64>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BlogPost>(&format!(
            r#"
            {POST_SELECT}
            FROM blog_posts p
            LEFT JOIN users u ON u.id = p.author_id
            WHERE NOT p.published AND ($1::BIGINT IS NULL OR p.author_id = $1)
            ORDER BY p.updated_at DESC, p.id DESC
            "#
        ))
        .bind(author_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, BlogPost>(&format!(
            r#"
            {POST_SELECT}
            FROM blog_posts p
            LEFT JOIN users u ON u.id = p.author_id
            WHERE p.slug = $1
            "#
        ))
        .bind(slug)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &PgPool,
        author_id: i64,
        slug: &str,
        req: &CreatePostRequest,
    ) -> AppResult<Self> {
        let result = sqlx::query_as::<_, BlogPost>(&format!(
            r#"
            WITH p AS (
                INSERT INTO blog_posts (slug, title, summary, body, author_id, published)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
            )
            {POST_SELECT}
            FROM p
            LEFT JOIN users u ON u.id = p.author_id
            "#
        ))
        .bind(slug)
        .bind(req.title.trim())
        .bind(req.summary.as_deref().map(str::trim))
        .bind(&req.body)
        .bind(author_id)
        .bind(req.published)
        .fetch_one(pool)
        .await;

        match result {
            Ok(post) => {
                tracing::info!("Created blog post {}", post.slug);
                Ok(post)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                AppError::Conflict(format!("A post with slug {slug} already exists")),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(
        pool: &PgPool,
        slug: &str,
        req: &UpdatePostRequest,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, BlogPost>(&format!(
            r#"
            WITH p AS (
                UPDATE blog_posts
                SET title = COALESCE($1, title),
                    summary = COALESCE($2, summary),
                    body = COALESCE($3, body),
                    published = COALESCE($4, published),
                    updated_at = NOW()
                WHERE slug = $5
                RETURNING *
            )
            {POST_SELECT}
            FROM p
            LEFT JOIN users u ON u.id = p.author_id
            "#
        ))
        .bind(req.title.as_deref().map(str::trim))
        .bind(req.summary.as_deref().map(str::trim))
        .bind(req.body.as_deref())
        .bind(req.published)
        .bind(slug)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blog_posts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl Comment {
    /// 评论按时间正序
    pub async fn list_for_post(pool: &PgPool, post_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            r#"
            {COMMENT_SELECT}
            FROM blog_comments c
            LEFT JOIN users u ON u.id = c.author_id
            WHERE c.post_id = $1
            ORDER BY c.created_at ASC, c.id ASC
            "#
        ))
        .bind(post_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &PgPool,
        post_id: i64,
        author_id: i64,
        body: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            r#"
            WITH c AS (
                INSERT INTO blog_comments (post_id, author_id, body)
                VALUES ($1, $2, $3)
                RETURNING *
            )
            {COMMENT_SELECT}
            FROM c
            LEFT JOIN users u ON u.id = c.author_id
            "#
        ))
        .bind(post_id)
        .bind(author_id)
        .bind(body.trim())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            r#"
            {COMMENT_SELECT}
            FROM blog_comments c
            LEFT JOIN users u ON u.id = c.author_id
            WHERE c.id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blog_comments WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Phase 2B: Dynamic   Blog  "), "phase-2b-dynamic-blog");
        assert_eq!(slugify("Café & crème"), "caf-cr-me");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("---a---"), "a");
    }

    #[test]
    fn test_slugify_truncates_without_trailing_dash() {
        let title = format!("{} tail", "a".repeat(79));
        let slug = slugify(&title);
        assert!(slug.len() <= SLUG_MAX_LEN);
        assert!(!slug.ends_with('-'));
        assert_eq!(slug, "a".repeat(79));
    }

    #[test]
    fn test_render_markdown_escapes_raw_html() {
        let html = render_markdown("# Title\n\n<script>alert(1)</script>\n\n~~old~~");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<del>old</del>"));
    }

    #[test]
    fn test_reading_time() {
        assert_eq!(reading_time_minutes(""), 1);
        assert_eq!(reading_time_minutes(&"word ".repeat(200)), 1);
        assert_eq!(reading_time_minutes(&"word ".repeat(201)), 2);
    }

    #[test]
    fn test_list_query_resolve() {
        let q = ListQuery { page: None, per_page: None };
        assert_eq!(q.resolve(), (1, DEFAULT_PER_PAGE));
        let q = ListQuery { page: Some(0), per_page: Some(500) };
        assert_eq!(q.resolve(), (1, MAX_PER_PAGE));
        let q = ListQuery { page: Some(3), per_page: Some(0) };
        assert_eq!(q.resolve(), (3, 1));
    }

    #[test]
    fn test_create_request_validation() {
        let req = CreatePostRequest {
            title: "First post".into(),
            summary: None,
            body: "Hello".into(),
            published: true,
        };
        assert_eq!(req.validate().unwrap(), "first-post");

        let req = CreatePostRequest {
            title: "???".into(),
            summary: None,
            body: "Hello".into(),
            published: false,
        };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));

        let req = CreatePostRequest {
            title: "Fine".into(),
            summary: None,
            body: "   ".into(),
            published: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_comment_validation() {
        assert!(validate_comment("nice post").is_ok());
        assert!(validate_comment("   ").is_err());
        assert!(validate_comment(&"x".repeat(COMMENT_MAX_LEN + 1)).is_err());
    }
}
