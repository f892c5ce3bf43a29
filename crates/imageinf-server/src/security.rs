//! Tenant allowlist
//!
//! Tokens are only accepted from tenants whose base URL is configured.

use thiserror::Error;
use url::Url;

/// Tenant validation errors
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL scheme '{0}' is not allowed, only HTTP(S) is permitted")]
    InvalidScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("Tenant '{0}' is not allowed")]
    UnauthorizedTenant(String),
}

/// Reduce a URL to its `scheme://host[:port]` origin.
///
/// Default ports are dropped, so `https://a.tapis.io:443/v3/tokens` becomes
/// `https://a.tapis.io`.
pub fn base_url(url_str: &str) -> Result<String, SecurityError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "https" | "http" => {}
        scheme => return Err(SecurityError::InvalidScheme(scheme.to_string())),
    }
    if url.host_str().is_none() {
        return Err(SecurityError::MissingHost);
    }

    Ok(url.origin().ascii_serialization())
}

/// Set of tenant base URLs whose tokens are accepted
#[derive(Debug, Clone)]
pub struct TenantAllowlist {
    tenants: Vec<String>,
}

impl TenantAllowlist {
    /// Build from configured URLs; each is normalized to its origin
    pub fn new<S: AsRef<str>>(tenants: &[S]) -> Result<Self, SecurityError> {
        let tenants = tenants
            .iter()
            .map(|t| base_url(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tenants })
    }

    pub fn tenants(&self) -> &[String] {
        &self.tenants
    }

    /// Resolve a token issuer to its tenant base URL if the tenant is allowed
    pub fn check_issuer(&self, issuer: &str) -> Result<String, SecurityError> {
        let base = base_url(issuer)?;
        if self.tenants.iter().any(|t| t.eq_ignore_ascii_case(&base)) {
            Ok(base)
        } else {
            Err(SecurityError::UnauthorizedTenant(base))
        }
    }
}
