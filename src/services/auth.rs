//! Identity verification and admin authorization for upload requests.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

/// Cookie consulted when no `Authorization` header is present.
pub const SESSION_COOKIE: &str = "__session";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token for `{0}` has been revoked")]
    Revoked(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// Claims carried by identity tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub jti: Option<String>,
    /// Custom claim granting admin rights.
    #[serde(default)]
    pub admin: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub admin_claim: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub email: Option<String>,
    pub admin_claim: Option<bool>,
}

impl AuthenticatedUser {
    /// Email if known, otherwise the uid. Used in audit logs.
    pub fn label(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.uid)
    }
}

/// Server-side verification against the identity provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Check signature, expiry and revocation of `token`.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;

    /// Role stored in the user's profile, if any.
    async fn lookup_role(&self, uid: &str) -> Result<Option<String>, AuthError>;
}

/// HS256 token verifier backed by the `revoked_tokens` and `user_profiles`
/// tables.
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
    db: Arc<SqlitePool>,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str, issuer: Option<&str>, db: Arc<SqlitePool>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            db,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let claims = decode::<IdentityClaims>(token, &self.key, &self.validation)?.claims;

        // A jti match revokes one token; a uid-wide entry revokes everything
        // issued before it.
        let revoked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM revoked_tokens
             WHERE jti = ? OR (jti IS NULL AND uid = ? AND revoked_at >= ?)",
        )
        .bind(claims.jti.as_deref())
        .bind(&claims.sub)
        .bind(claims.iat * 1000)
        .fetch_one(&*self.db)
        .await?;

        if revoked > 0 {
            return Err(AuthError::Revoked(claims.sub));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
            admin_claim: claims.admin,
        })
    }

    async fn lookup_role(&self, uid: &str) -> Result<Option<String>, AuthError> {
        let role = sqlx::query_scalar::<_, String>("SELECT role FROM user_profiles WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&*self.db)
            .await?;
        Ok(role)
    }
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Authentication + authorization gate in front of the pipeline.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn IdentityVerifier>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    /// Verified user for `token`, or `None` on any failure.
    pub async fn authenticate(&self, token: Option<&str>) -> Option<AuthenticatedUser> {
        let token = token?;
        match self.verifier.verify(token).await {
            Ok(identity) => Some(AuthenticatedUser {
                uid: identity.uid,
                email: identity.email,
                admin_claim: identity.admin_claim,
            }),
            Err(err) => {
                tracing::warn!(error = %err, "identity token verification failed");
                None
            }
        }
    }

    /// Admin claim wins; without one the profile role decides.
    pub async fn authorize(&self, user: &AuthenticatedUser) -> bool {
        if let Some(admin) = user.admin_claim {
            return admin;
        }
        match self.verifier.lookup_role(&user.uid).await {
            Ok(role) => role.as_deref() == Some("admin"),
            Err(err) => {
                tracing::error!(uid = %user.uid, user = %user.label(), error = %err, "role lookup failed");
                false
            }
        }
    }
}
