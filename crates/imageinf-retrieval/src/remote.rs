//! Remote files service client

use async_trait::async_trait;
use bytes::Bytes;
use imageinf_core::{Error, FileReference, Principal, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Header carrying the caller's token on every files request
pub const TOKEN_HEADER: &str = "X-Tapis-Token";

/// Downloads raw file bytes on behalf of a principal
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    async fn download(&self, principal: &Principal, file: &FileReference) -> Result<Bytes>;
}

/// Client for the Tapis Files `content` endpoint
#[derive(Debug, Clone)]
pub struct TapisFilesClient {
    http: reqwest::Client,
}

impl TapisFilesClient {
    /// Create a client with a request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Wrap an existing client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `<tenant>/v3/files/content/<system>/<path...>`, each segment percent-encoded
    pub fn content_url(tenant_host: &str, file: &FileReference) -> Result<Url> {
        let invalid = |msg: String| Error::retrieval(&file.system_id, &file.path, msg);

        let mut url = Url::parse(tenant_host)
            .map_err(|e| invalid(format!("invalid tenant host '{}': {}", tenant_host, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid(format!("tenant host '{}' cannot be a base", tenant_host)))?;
            segments
                .pop_if_empty()
                .extend(["v3", "files", "content", file.system_id.trim_matches('/')])
                .extend(file.path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteFiles for TapisFilesClient {
    async fn download(&self, principal: &Principal, file: &FileReference) -> Result<Bytes> {
        let url = Self::content_url(&principal.tenant_host, file)?;
        let failed = |msg: String| Error::retrieval(&file.system_id, &file.path, msg);

        debug!(user = %principal.username, %url, "Downloading file");
        let response = self
            .http
            .get(url)
            .header(TOKEN_HEADER, &principal.token)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| failed(format!("failed to read body: {}", e))),
            StatusCode::NOT_FOUND => Err(failed("not found".to_string())),
            status => Err(failed(format!("files service returned {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_url() {
        let file = FileReference::new("project-abc", "/photos/site 1/img.jpg");
        let url = TapisFilesClient::content_url("https://designsafe.tapis.io", &file).unwrap();
        assert_eq!(
            url.as_str(),
            "https://designsafe.tapis.io/v3/files/content/project-abc/photos/site%201/img.jpg"
        );
    }

    #[test]
    fn test_content_url_with_trailing_slash_host() {
        let file = FileReference::new("sys", "a.png");
        let url = TapisFilesClient::content_url("https://portals.tapis.io/", &file).unwrap();
        assert_eq!(url.path(), "/v3/files/content/sys/a.png");
    }

    #[test]
    fn test_content_url_bad_host() {
        let file = FileReference::new("sys", "a.png");
        assert!(TapisFilesClient::content_url("not a url", &file).is_err());
    }
}
