//! Tapis token authentication
//!
//! A request is authenticated in four steps:
//! 1. read the `X-Tapis-Token` header
//! 2. read the `iss` claim without verifying the token
//! 3. check the issuer's tenant against the allowlist
//! 4. verify the token with a [`TokenValidator`] and take the username from it

use crate::security::{SecurityError, TenantAllowlist};
use async_trait::async_trait;
use imageinf_core::Principal;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Authentication failures. Every variant except `Internal` is a 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing X-Tapis-Token")]
    MissingToken,

    #[error("Invalid token: failed to decode")]
    Undecodable,

    #[error("Invalid token: missing issuer claim")]
    MissingIssuer,

    #[error("Unauthorized Tapis tenant")]
    UnauthorizedTenant(String),

    #[error("Authentication failed: {0}")]
    Validation(String),

    #[error("Invalid token: missing username")]
    MissingUsername,

    #[error("Internal server error")]
    Internal(String),
}

/// Claims read from a Tapis token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapisClaims {
    #[serde(default)]
    pub iss: Option<String>,

    #[serde(default, rename = "tapis/username")]
    pub username: Option<String>,

    #[serde(default, rename = "tapis/tenant_id")]
    pub tenant_id: Option<String>,
}

/// Decode claims without checking the signature or expiry.
///
/// Only used to find the issuer before the token is verified.
pub fn read_unverified(token: &str) -> Result<TapisClaims, AuthError> {
    let header = decode_header(token).map_err(|_| AuthError::Undecodable)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TapisClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::Undecodable)
}

/// Verifies a token issued by an allowed tenant
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Return the verified claims, or [`AuthError::Validation`]
    async fn validate(&self, token: &str, tenant_base: &str, unverified: &TapisClaims) -> Result<TapisClaims, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TenantResponse {
    result: TenantRecord,
}

#[derive(Debug, Deserialize)]
struct TenantRecord {
    public_key: String,
}

/// Verifies RS256 signatures against the tenant's published public key.
///
/// Keys are fetched from `<tenant>/v3/tenants/<tenant_id>` once and cached.
pub struct TenantKeyValidator {
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl TenantKeyValidator {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            keys: RwLock::new(HashMap::new()),
        })
    }

    async fn key_for(&self, tenant_base: &str, tenant_id: &str) -> Result<DecodingKey, AuthError> {
        let cache_key = format!("{}/{}", tenant_base, tenant_id);
        if let Some(key) = self.keys.read().get(&cache_key) {
            return Ok(key.clone());
        }

        let url = format!("{}/v3/tenants/{}", tenant_base, tenant_id);
        debug!(%url, "Fetching tenant public key");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Validation(format!("tenant lookup failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::Validation(format!(
                "tenant lookup returned {}",
                response.status()
            )));
        }
        let tenant: TenantResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Validation(format!("invalid tenant response: {}", e)))?;

        let key = DecodingKey::from_rsa_pem(tenant.result.public_key.as_bytes())
            .map_err(|e| AuthError::Validation(format!("invalid tenant public key: {}", e)))?;
        self.keys.write().insert(cache_key, key.clone());
        Ok(key)
    }
}

#[async_trait]
impl TokenValidator for TenantKeyValidator {
    async fn validate(&self, token: &str, tenant_base: &str, unverified: &TapisClaims) -> Result<TapisClaims, AuthError> {
        let tenant_id = unverified
            .tenant_id
            .as_deref()
            .ok_or_else(|| AuthError::Validation("token has no tenant id".to_string()))?;
        let key = self.key_for(tenant_base, tenant_id).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        decode::<TapisClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Validation("token expired".to_string()),
                ErrorKind::InvalidSignature => AuthError::Validation("invalid signature".to_string()),
                _ => AuthError::Validation(e.to_string()),
            })
    }
}

/// Accepts any decodable token from an allowed tenant. Development only.
pub struct UnverifiedValidator;

#[async_trait]
impl TokenValidator for UnverifiedValidator {
    async fn validate(&self, _token: &str, _tenant_base: &str, unverified: &TapisClaims) -> Result<TapisClaims, AuthError> {
        Ok(unverified.clone())
    }
}

/// Turns a raw token into a [`Principal`]
#[derive(Clone)]
pub struct Authenticator {
    allowlist: TenantAllowlist,
    validator: Arc<dyn TokenValidator>,
}

impl Authenticator {
    pub fn new(allowlist: TenantAllowlist, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            allowlist,
            validator,
        }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let unverified = read_unverified(token)?;
        let issuer = unverified.iss.as_deref().ok_or(AuthError::MissingIssuer)?;

        let tenant_base = self.allowlist.check_issuer(issuer).map_err(|e| match e {
            SecurityError::UnauthorizedTenant(base) => {
                warn!(tenant = %base, "Unauthorized Tapis tenant");
                AuthError::UnauthorizedTenant(base)
            }
            other => {
                warn!(issuer = %issuer, error = %other, "Unusable token issuer");
                AuthError::UnauthorizedTenant(issuer.to_string())
            }
        })?;

        let claims = self.validator.validate(token, &tenant_base, &unverified).await?;
        let username = claims
            .username
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::MissingUsername)?;

        debug!(user = %username, tenant = %tenant_base, "Authenticated");
        Ok(Principal::new(username, token, tenant_base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"dummy-key")).unwrap()
    }

    fn authenticator() -> Authenticator {
        let allowlist = TenantAllowlist::new(&["https://designsafe.tapis.io"]).unwrap();
        Authenticator::new(allowlist, Arc::new(UnverifiedValidator))
    }

    #[test]
    fn test_read_unverified_ignores_signature_and_expiry() {
        let t = token(json!({
            "iss": "https://designsafe.tapis.io/v3/tokens",
            "tapis/username": "jdoe",
            "tapis/tenant_id": "designsafe",
            "exp": 1,
        }));
        let claims = read_unverified(&t).unwrap();
        assert_eq!(claims.iss.as_deref(), Some("https://designsafe.tapis.io/v3/tokens"));
        assert_eq!(claims.username.as_deref(), Some("jdoe"));
        assert_eq!(claims.tenant_id.as_deref(), Some("designsafe"));
    }

    #[test]
    fn test_read_unverified_garbage() {
        assert!(matches!(read_unverified("not-a-jwt"), Err(AuthError::Undecodable)));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let t = token(json!({
            "iss": "https://designsafe.tapis.io/v3/tokens",
            "tapis/username": "jdoe",
        }));
        let principal = authenticator().authenticate(Some(&t)).await.unwrap();
        assert_eq!(principal.username, "jdoe");
        assert_eq!(principal.tenant_host, "https://designsafe.tapis.io");
        assert_eq!(principal.token, t);
    }

    #[tokio::test]
    async fn test_authenticate_failures() {
        let auth = authenticator();

        let err = auth.authenticate(None).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing X-Tapis-Token");

        let err = auth.authenticate(Some("garbage")).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid token: failed to decode");

        let t = token(json!({ "tapis/username": "jdoe" }));
        let err = auth.authenticate(Some(&t)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid token: missing issuer claim");

        let t = token(json!({ "iss": "https://other.tapis.io/v3/tokens", "tapis/username": "jdoe" }));
        let err = auth.authenticate(Some(&t)).await.unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized Tapis tenant");

        let t = token(json!({ "iss": "https://designsafe.tapis.io/v3/tokens" }));
        let err = auth.authenticate(Some(&t)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid token: missing username");
    }
}
