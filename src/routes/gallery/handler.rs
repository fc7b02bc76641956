use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    AppState,
    access::AccessLevel,
    config::Config,
    error::{AppError, AppResult},
    middleware::require_level,
    utils::{Claims, success_to_api_response},
};

use super::model::{Visibility, validate_file_name};

#[derive(Debug, Serialize)]
pub struct DeletedImage {
    pub name: String,
}

fn url_prefix(state: &AppState, visibility: Visibility) -> String {
    format!("{}/gallery/{}", state.config.api_base_uri, visibility.dir_name())
}

async fn list(state: &AppState, visibility: Visibility) -> AppResult<Response> {
    let images = state
        .gallery
        .list(visibility, &url_prefix(state, visibility))
        .await?;
    Ok(success_to_api_response(images).into_response())
}

async fn serve(state: &AppState, visibility: Visibility, name: &str) -> AppResult<Response> {
    let bytes = state.gallery.read(visibility, name).await?;
    let cache_control = match visibility {
        Visibility::Public => "public, max-age=3600",
        Visibility::Private => "private, no-store",
    };

    Ok((
        [
            (header::CONTENT_TYPE, super::model::content_type(name)),
            (header::CACHE_CONTROL, cache_control),
        ],
        bytes,
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn list_public(State(state): State<AppState>) -> AppResult<Response> {
    list(&state, Visibility::Public).await
}

#[axum::debug_handler]
pub async fn public_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    serve(&state, Visibility::Public, &name).await
}

#[axum::debug_handler]
pub async fn list_private(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Response> {
    require_level(&claims, Visibility::Private.required_level())?;
    list(&state, Visibility::Private).await
}

#[axum::debug_handler]
pub async fn private_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    require_level(&claims, Visibility::Private.required_level())?;
    serve(&state, Visibility::Private, &name).await
}

/// 上传请求体大小上限，超出时读取表单返回 413
pub fn upload_body_limit(config: &Config) -> DefaultBodyLimit {
    DefaultBodyLimit::max(config.gallery_max_upload_bytes)
}

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(limit)
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// 读取表单中的 file 字段，返回文件名和内容
async fn read_upload(multipart: &mut Multipart, limit: usize) -> AppResult<(String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("Missing file name".into()))?;
        validate_file_name(&name)?;

        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        if bytes.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".into()));
        }
        return Ok((name, bytes));
    }

    Err(AppError::Validation("Missing form field: file".into()))
}

/// 管理员上传图片，表单字段名为 file
#[axum::debug_handler]
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(visibility): Path<Visibility>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    require_level(&claims, AccessLevel::Admin)?;

    let (name, bytes) = read_upload(&mut multipart, state.config.gallery_max_upload_bytes).await?;
    let image = state
        .gallery
        .save(visibility, &name, &bytes, &url_prefix(&state, visibility))
        .await?;
    tracing::info!("{} uploaded {} image {}", claims.sub, visibility.dir_name(), name);

    Ok((StatusCode::CREATED, success_to_api_response(image)).into_response())
}

#[axum::debug_handler]
pub async fn delete_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((visibility, name)): Path<(Visibility, String)>,
) -> AppResult<Response> {
    require_level(&claims, AccessLevel::Admin)?;

    state.gallery.delete(visibility, &name).await?;
    tracing::info!("{} deleted {} image {}", claims.sub, visibility.dir_name(), name);

    Ok(success_to_api_response(DeletedImage { name }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::post};
    use tower::ServiceExt;

    const BOUNDARY: &str = "gallery-boundary";

    fn upload_request(file_name: &str, payload: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn upload_router(max_bytes: usize) -> Router {
        let config = Config::from_lookup(move |key| match key {
            "DATABASE_URL" => Some("postgres://localhost/site".into()),
            "REDIS_URL" => Some("redis://127.0.0.1/".into()),
            "JWT_SECRET" => Some("test-secret-0123456789".into()),
            "GALLERY_MAX_UPLOAD_BYTES" => Some(max_bytes.to_string()),
            _ => None,
        })
        .unwrap();
        let limit = config.gallery_max_upload_bytes;

        Router::new().route(
            "/upload",
            post(move |mut multipart: Multipart| async move {
                read_upload(&mut multipart, limit).await.map(|(name, _)| name)
            })
            .layer(upload_body_limit(&config)),
        )
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_within_limit() {
        let response = upload_router(1024)
            .oneshot(upload_request("cat.png", &[7u8; 100]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"cat.png");
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_with_413() {
        let response = upload_router(1024)
            .oneshot(upload_request("cat.png", &[7u8; 8 * 1024]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert_eq!(body["code"], crate::utils::error_codes::PAYLOAD_TOO_LARGE);
        assert_eq!(body["msg"], "Upload exceeds the 1024 byte limit");
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_file_name() {
        let response = upload_router(1024)
            .oneshot(upload_request("../cat.png", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
