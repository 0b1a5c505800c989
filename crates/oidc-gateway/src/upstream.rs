//! Authenticated client for the upstream API server.
//!
//! The upstream is reached with a bearer token and a TLS configuration that
//! trusts only the CA bundle shipped alongside the token. Both are read once
//! when the client is built; a credential change requires a restart.
//!
//! Response bodies are streamed into memory with a hard ceiling
//! ([`MAX_RESPONSE_SIZE`]) so a misbehaving upstream cannot exhaust memory.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{StartupError, UpstreamError};

/// Maximum accepted upstream body size (10 MiB).
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Source of raw document bytes.
///
/// [`UpstreamClient`] is the production implementation; the orchestrator only
/// sees this trait.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetches the document at `path` relative to the upstream base URL.
    ///
    /// Dropping the returned future cancels the request.
    async fn fetch(&self, path: &str) -> Result<Bytes, UpstreamError>;
}

/// HTTP client for the upstream API server.
pub struct UpstreamClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    max_response_size: usize,
}

impl UpstreamClient {
    /// Builds a client from configuration, reading the token and CA bundle.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if:
    /// - the base URL does not parse
    /// - the token file cannot be read or is empty
    /// - the CA file cannot be read or holds no PEM certificates
    /// - the HTTP client cannot be constructed
    pub fn new(config: &UpstreamConfig) -> Result<Self, StartupError> {
        let base_url = parse_base_url(&config.base_url)?;
        let token = read_token(&config.token_path)?;
        let roots = read_ca_bundle(&config.ca_cert_path)?;

        let mut builder = reqwest::Client::builder()
            .tls_built_in_root_certs(false)
            .timeout(config.timeout())
            .user_agent(concat!("oidc-gateway/", env!("CARGO_PKG_VERSION")));
        for cert in roots {
            builder = builder.add_root_certificate(cert);
        }
        let http_client = builder.build().map_err(StartupError::HttpClient)?;

        tracing::info!(
            upstream = %base_url,
            timeout_secs = config.timeout_secs,
            "upstream client initialized"
        );

        Ok(Self {
            http_client,
            base_url,
            token,
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Overrides the response size ceiling.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Bytes, UpstreamError> {
        let max_size = self.max_response_size;

        if let Some(len) = response.content_length()
            && len > max_size as u64
        {
            return Err(UpstreamError::TooLarge { max_size });
        }

        let capacity = response
            .content_length()
            .map_or(0, |len| len as usize);
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(UpstreamError::BodyRead)?;
            if body.len() + chunk.len() > max_size {
                return Err(UpstreamError::TooLarge { max_size });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[async_trait]
impl DocumentSource for UpstreamClient {
    async fn fetch(&self, path: &str) -> Result<Bytes, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(UpstreamError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        self.read_body(response).await
    }
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url)
            .field("token", &"[redacted]")
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

fn parse_base_url(raw: &str) -> Result<String, StartupError> {
    let invalid = |reason: String| StartupError::InvalidUpstreamUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn read_token(path: &Path) -> Result<String, StartupError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StartupError::TokenRead {
        path: path.to_path_buf(),
        source,
    })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(StartupError::EmptyToken(path.to_path_buf()));
    }
    Ok(token.to_string())
}

fn read_ca_bundle(path: &Path) -> Result<Vec<reqwest::Certificate>, StartupError> {
    let pem = std::fs::read(path).map_err(|source| StartupError::CaRead {
        path: path.to_path_buf(),
        source,
    })?;
    let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| StartupError::CaParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if certs.is_empty() {
        return Err(StartupError::CaParse {
            path: path.to_path_buf(),
            reason: "no PEM certificates found".into(),
        });
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url_trims_trailing_slash() {
        assert_eq!(
            parse_base_url("https://kubernetes.default.svc/").unwrap(),
            "https://kubernetes.default.svc"
        );
        assert_eq!(
            parse_base_url("http://127.0.0.1:6443").unwrap(),
            "http://127.0.0.1:6443"
        );
    }

    #[test]
    fn test_parse_base_url_rejects_other_schemes() {
        assert!(matches!(
            parse_base_url("file:///etc/passwd"),
            Err(StartupError::InvalidUpstreamUrl { .. })
        ));
        assert!(parse_base_url("kubernetes.default.svc").is_err());
    }

    #[test]
    fn test_read_token_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "abc.def.ghi\n").unwrap();
        assert_eq!(read_token(&path).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_read_token_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            read_token(&missing),
            Err(StartupError::TokenRead { .. })
        ));

        let blank = dir.path().join("blank");
        std::fs::write(&blank, " \n").unwrap();
        assert!(matches!(read_token(&blank), Err(StartupError::EmptyToken(_))));
    }

    #[test]
    fn test_read_ca_bundle_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, "not a certificate").unwrap();
        assert!(matches!(
            read_ca_bundle(&path),
            Err(StartupError::CaParse { .. })
        ));
    }
}
