#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use upload_gate::{
    models::stored_file::{StoredFile, UploadMetadata},
    services::{
        auth::{AuthError, AuthGate, IdentityVerifier, VerifiedIdentity},
        pipeline::{UploadConfig, UploadPipeline},
        rate_limiter::RateLimiter,
        storage::{ObjectStore, StorageError, StorageResult},
    },
};
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "admin-token";
pub const EDITOR_TOKEN: &str = "editor-token";
pub const PROFILE_ADMIN_TOKEN: &str = "profile-admin-token";

pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n";

/// Token table standing in for the identity provider.
pub struct FakeVerifier {
    identities: HashMap<&'static str, VerifiedIdentity>,
    roles: HashMap<&'static str, &'static str>,
}

impl FakeVerifier {
    pub fn new() -> Self {
        let identity = |uid: &str, admin: Option<bool>| VerifiedIdentity {
            uid: uid.into(),
            email: Some(format!("{}@example.com", uid)),
            admin_claim: admin,
        };
        let mut identities = HashMap::new();
        identities.insert(ADMIN_TOKEN, identity("alice", Some(true)));
        identities.insert(EDITOR_TOKEN, identity("bob", None));
        identities.insert(PROFILE_ADMIN_TOKEN, identity("carol", None));
        let mut roles = HashMap::new();
        roles.insert("bob", "editor");
        roles.insert("carol", "admin");
        Self { identities, roles }
    }
}

#[async_trait]
impl IdentityVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        self.identities
            .get(token)
            .cloned()
            .ok_or(AuthError::Revoked(token.to_string()))
    }

    async fn lookup_role(&self, uid: &str) -> Result<Option<String>, AuthError> {
        Ok(self.roles.get(uid).map(|r| r.to_string()))
    }
}

/// Store that records writes instead of touching disk.
#[derive(Default)]
pub struct RecordingStore {
    pub puts: Mutex<Vec<(String, String, usize)>>,
    pub fail: bool,
    /// Puts still to be answered with `KeyExists`.
    pub collisions: AtomicUsize,
    /// Every key a put was attempted for.
    pub attempted: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_collisions(n: usize) -> Self {
        Self {
            collisions: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &UploadMetadata,
    ) -> StorageResult<StoredFile> {
        self.attempted.lock().unwrap().push(key.to_string());
        if self.fail {
            return Err(StorageError::Io(std::io::Error::other("bucket unavailable")));
        }
        let taken = self
            .collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            return Err(StorageError::KeyExists(key.to_string()));
        }
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), bytes.len()));
        Ok(StoredFile {
            id: Uuid::new_v4(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as i64,
            etag: format!("{:x}", md5::compute(&bytes)),
            uploader_uid: metadata.uploader_uid.clone(),
            original_name: metadata.original_name.clone(),
            client_ip: metadata.client_ip.clone(),
            uploaded_at: Utc::now(),
            is_public: true,
        })
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://storage.example.com/assets/{}", key)
    }
}

pub fn auth_gate() -> AuthGate {
    AuthGate::new(Arc::new(FakeVerifier::new()))
}

pub fn pipeline_with(
    config: UploadConfig,
    limit: u32,
    store: Arc<dyn ObjectStore>,
) -> UploadPipeline {
    UploadPipeline::new(
        config,
        Arc::new(RateLimiter::new(limit, Duration::from_secs(60))),
        auth_gate(),
        store,
    )
}
