//! Object persistence: payload bytes on local disk beneath
//! `base_path/{bucket}/{key}`, one `stored_files` row per object in SQLite.

use crate::models::stored_file::{StoredFile, UploadMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidKey,
    #[error("object `{0}` already exists")]
    KeyExists(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Destination for accepted uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key` as a publicly readable object.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> StorageResult<StoredFile>;

    /// Deterministic public URL for `key`.
    fn public_url(&self, key: &str) -> String;
}

/// Disk + SQLite backed [`ObjectStore`].
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    pub bucket: String,

    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Keys are produced by the pipeline, but the store re-checks them before
    /// touching the filesystem.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(&self.bucket);
        path.push(key);
        path
    }

    /// Metadata for a public object.
    pub async fn fetch_public(&self, key: &str) -> StorageResult<StoredFile> {
        self.ensure_key_safe(key)?;
        sqlx::query_as::<_, StoredFile>(
            "SELECT id, key, content_type, size_bytes, etag, uploader_uid, original_name,
                    client_ip, uploaded_at, is_public
             FROM stored_files WHERE key = ? AND is_public = 1",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Metadata and an open file handle ready for streaming out.
    pub async fn open_public(&self, key: &str) -> StorageResult<(StoredFile, File)> {
        let meta = self.fetch_public(key).await?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((meta, file))
    }

    /// Write `bytes` to a synced temp file next to `file_path` and return its
    /// path. Nothing is visible under `file_path` yet.
    async fn stage_payload(&self, file_path: &Path, bytes: &[u8]) -> StorageResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(tmp_path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> StorageResult<StoredFile> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let tmp_path = self.stage_payload(&file_path, &bytes).await?;

        // The row claims the key; an existing object is never touched.
        let etag = format!("{:x}", md5::compute(&bytes));
        let inserted = sqlx::query_as::<_, StoredFile>(
            r#"
            INSERT INTO stored_files (
                id, key, content_type, size_bytes, etag, uploader_uid,
                original_name, client_ip, uploaded_at, is_public
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING id, key, content_type, size_bytes, etag, uploader_uid,
                      original_name, client_ip, uploaded_at, is_public
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(&metadata.uploader_uid)
        .bind(&metadata.original_name)
        .bind(metadata.client_ip.as_deref())
        .bind(metadata.uploaded_at)
        .fetch_one(&*self.db)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(match err {
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                        StorageError::KeyExists(key.to_string())
                    }
                    other => StorageError::Sqlx(other),
                });
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            let _ = sqlx::query("DELETE FROM stored_files WHERE id = ?")
                .bind(row.id)
                .execute(&*self.db)
                .await;
            return Err(StorageError::Io(err));
        }

        tracing::debug!(key, size = row.size_bytes, "stored object");
        Ok(row)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Utc;
    use tokio::io::AsyncReadExt;

    async fn store(dir: &Path) -> LocalObjectStore {
        let pool = Arc::new(db::memory_pool().await.unwrap());
        LocalObjectStore::new(pool, dir, "assets", "https://cdn.example.com/files/")
    }

    fn meta() -> UploadMetadata {
        UploadMetadata {
            uploader_uid: "alice".into(),
            original_name: "logo.png".into(),
            client_ip: Some("10.0.0.1".into()),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_writes_bytes_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let row = store
            .put("tags/global/1.png", Bytes::from_static(b"\x89PNG data"), "image/png", &meta())
            .await
            .unwrap();
        assert!(row.is_public);
        assert_eq!(row.size_bytes, 9);
        assert_eq!(row.etag, format!("{:x}", md5::compute(b"\x89PNG data")));

        let (fetched, mut file) = store.open_public("tags/global/1.png").await.unwrap();
        assert_eq!(fetched.id, row.id);
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"\x89PNG data");
        assert!(dir.path().join("assets/tags/global/1.png").exists());
    }

    #[tokio::test]
    async fn second_put_to_same_key_keeps_first_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store
            .put("posts/1.png", Bytes::from_static(b"first"), "image/png", &meta())
            .await
            .unwrap();

        let err = store
            .put("posts/1.png", Bytes::from_static(b"second"), "image/png", &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyExists(ref key) if key == "posts/1.png"));

        let (row, mut file) = store.open_public("posts/1.png").await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"first");
        assert_eq!(row.size_bytes, 5);

        // No staged temp files are left behind.
        let mut entries = fs::read_dir(dir.path().join("assets/posts")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["1.png".to_string()]);
    }

    #[tokio::test]
    async fn unsafe_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for key in ["", "/etc/passwd", "a/../b", "a\\b"] {
            let err = store
                .put(key, Bytes::from_static(b"x"), "image/png", &meta())
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn public_url_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert_eq!(
            store.public_url("posts/1700000000000.pdf"),
            "https://cdn.example.com/files/assets/posts/1700000000000.pdf"
        );
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert!(matches!(
            store.open_public("posts/none.png").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
