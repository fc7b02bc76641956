//! Gallery images stored on disk.
//!
//! Layout under the configured root:
//!
//! ```text
//! gallery/
//! ├── public/    # visible to everyone
//! └── private/   # requires the `gallery` access level
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::access::AccessLevel;
use crate::error::{AppError, AppResult};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const FILE_NAME_MAX_LEN: usize = 128;
const STAGING_PREFIX: &str = ".upload-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn dir_name(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn required_level(self) -> AccessLevel {
        match self {
            Visibility::Public => AccessLevel::Public,
            Visibility::Private => AccessLevel::Gallery,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryImage {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub url: String,
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// 文件名只允许单层、普通字符，防止路径穿越
pub fn validate_file_name(name: &str) -> AppResult<()> {
    let valid = !name.is_empty()
        && name.len() <= FILE_NAME_MAX_LEN
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if !valid {
        return Err(AppError::Validation(format!("Invalid file name: {name}")));
    }
    if !is_image(name) {
        return Err(AppError::Validation(format!(
            "Unsupported image type, expected one of: {}",
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self, visibility: Visibility) -> PathBuf {
        self.root.join(visibility.dir_name())
    }

    fn path_for(&self, visibility: Visibility, name: &str) -> AppResult<PathBuf> {
        validate_file_name(name)?;
        Ok(self.dir(visibility).join(name))
    }

    /// 创建 public/ 与 private/ 目录
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for visibility in [Visibility::Public, Visibility::Private] {
            tokio::fs::create_dir_all(self.dir(visibility)).await?;
        }
        Ok(())
    }

    /// 列出图片，最新的在前；目录不存在时返回空列表
    pub async fn list(
        &self,
        visibility: Visibility,
        url_prefix: &str,
    ) -> AppResult<Vec<GalleryImage>> {
        let mut entries = match tokio::fs::read_dir(self.dir(visibility)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_file_name(&name).is_err() {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            images.push(GalleryImage {
                url: format!("{}/{}", url_prefix.trim_end_matches('/'), name),
                size_bytes: metadata.len(),
                modified_at: metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_default(),
                name,
            });
        }

        images.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(images)
    }

    pub async fn read(&self, visibility: Visibility, name: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(visibility, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Image {name} not found")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 保存图片，已存在同名文件时拒绝覆盖。
    ///
    /// 先写入同目录下的临时文件，写完后硬链接到目标名，写入失败不会留下半截图片。
    pub async fn save(
        &self,
        visibility: Visibility,
        name: &str,
        bytes: &[u8],
        url_prefix: &str,
    ) -> AppResult<GalleryImage> {
        let path = self.path_for(visibility, name)?;
        let dir = self.dir(visibility);
        tokio::fs::create_dir_all(&dir).await?;

        let staging = dir.join(format!("{STAGING_PREFIX}{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = write_staged(&staging, bytes).await {
            discard_staged(&staging).await;
            return Err(e.into());
        }

        // hard_link 在目标已存在时失败，不会覆盖
        let linked = tokio::fs::hard_link(&staging, &path).await;
        discard_staged(&staging).await;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(AppError::Conflict(format!("Image {name} already exists")));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Saved {} image {}", visibility.dir_name(), name);
        Ok(GalleryImage {
            name: name.to_string(),
            size_bytes: bytes.len() as u64,
            modified_at: Utc::now(),
            url: format!("{}/{}", url_prefix.trim_end_matches('/'), name),
        })
    }

    pub async fn delete(&self, visibility: Visibility, name: &str) -> AppResult<()> {
        let path = self.path_for(visibility, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted {} image {}", visibility.dir_name(), name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Image {name} not found")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_staged(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn discard_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to remove staged upload {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("sunset.jpg").is_ok());
        assert!(validate_file_name("Trip_2024-01.PNG").is_ok());
        assert!(validate_file_name("../etc/passwd.png").is_err());
        assert!(validate_file_name("a/b.png").is_err());
        assert!(validate_file_name(".hidden.png").is_err());
        assert!(validate_file_name("notes.txt").is_err());
        assert!(validate_file_name("noext").is_err());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(&format!("{}.png", "a".repeat(130))).is_err());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.JPG"), "image/jpeg");
        assert_eq!(content_type("a.jpeg"), "image/jpeg");
        assert_eq!(content_type("a.webp"), "image/webp");
        assert_eq!(content_type("a.bin"), "application/octet-stream");
    }

    #[test]
    fn test_visibility_levels() {
        assert_eq!(Visibility::Public.required_level(), AccessLevel::Public);
        assert_eq!(Visibility::Private.required_level(), AccessLevel::Gallery);
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("nowhere"));
        let images = store.list(Visibility::Public, "/api/gallery/public").await.unwrap();
        assert!(images.is_empty());
    }

    #[tokio::test]
    async fn test_save_list_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        let saved = store
            .save(Visibility::Private, "cat.png", b"png-bytes", "/api/gallery/private")
            .await
            .unwrap();
        assert_eq!(saved.url, "/api/gallery/private/cat.png");
        assert_eq!(saved.size_bytes, 9);

        // 非图片文件不出现在列表中
        std::fs::write(dir.path().join("private").join("readme.txt"), "x").unwrap();

        let images = store.list(Visibility::Private, "/api/gallery/private").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "cat.png");
        assert!(store.list(Visibility::Public, "/p").await.unwrap().is_empty());

        let bytes = store.read(Visibility::Private, "cat.png").await.unwrap();
        assert_eq!(bytes, b"png-bytes");

        store.delete(Visibility::Private, "cat.png").await.unwrap();
        let err = store.read(Visibility::Private, "cat.png").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = store.delete(Visibility::Private, "cat.png").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());

        store.save(Visibility::Public, "a.gif", b"one", "/g").await.unwrap();
        let err = store.save(Visibility::Public, "a.gif", b"two", "/g").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.read(Visibility::Public, "a.gif").await.unwrap(), b"one");
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_save_leaves_no_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());

        store.save(Visibility::Public, "a.png", b"one", "/g").await.unwrap();
        assert!(store.save(Visibility::Public, "a.png", b"two", "/g").await.is_err());
        assert_eq!(dir_entries(&dir.path().join("public")), vec!["a.png"]);
    }

    #[tokio::test]
    async fn test_interrupted_upload_does_not_block_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        // 进程在写入途中退出时只会留下临时文件
        let leftover = dir.path().join("public").join(".upload-dead.tmp");
        std::fs::write(&leftover, b"").unwrap();

        assert!(store.list(Visibility::Public, "/g").await.unwrap().is_empty());
        store.save(Visibility::Public, "half.png", b"full", "/g").await.unwrap();
        let images = store.list(Visibility::Public, "/g").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "half.png");
        assert_eq!(store.read(Visibility::Public, "half.png").await.unwrap(), b"full");
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        let err = store.read(Visibility::Public, "../private/a.png").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
