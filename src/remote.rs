//! Remote compression service.
//!
//! When `remote.enabled` is set, artifacts come from an external optimizer
//! instead of the local transcoder. The protocol is two GETs:
//!
//! ```text
//! GET {endpoint}?img={absolute source URL}&qlty={quality}
//!   → {"dest": "https://…/optimized.jpg", …}
//! GET {dest}
//!   → artifact bytes
//! ```
//!
//! A response without a string `dest` is terminal for this render; there
//! is no retry and no backoff.

use crate::config::{EngineConfig, SiteConfig};
use crate::types::ResolvedImage;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Upper bound on a downloaded artifact.
const MAX_ARTIFACT_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote service failure: {0}")]
    ServiceFailure(String),
    #[error("remote response has no destination URL")]
    MissingDestination,
    #[error("invalid remote endpoint {url:?}: {reason}")]
    Endpoint { url: String, reason: String },
}

/// Byte transport for the remote protocol.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Blocking HTTP transport with a global per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_size: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            max_size: MAX_ARTIFACT_BYTES,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.remote.timeout())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| RemoteError::ServiceFailure(format!("{url}: {e}")))?;
        response
            .body_mut()
            .with_config()
            .limit(self.max_size)
            .read_to_vec()
            .map_err(|e| RemoteError::ServiceFailure(format!("{url}: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    dest: Option<String>,
}

/// Client for the remote optimizer.
pub struct RemoteOptimizer<F: Fetcher> {
    fetcher: F,
    endpoint: String,
    site: SiteConfig,
}

impl<F: Fetcher> RemoteOptimizer<F> {
    pub fn new(fetcher: F, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            endpoint: config.remote.endpoint.clone(),
            site: config.site.clone(),
        }
    }

    /// Service request for one source image.
    pub fn request_url(&self, image: &ResolvedImage, quality: u32) -> Result<Url, RemoteError> {
        let source = absolute_source_url(&image.public_src, &self.site);
        Url::parse_with_params(
            &self.endpoint,
            &[("img", source), ("qlty", quality.to_string())],
        )
        .map_err(|e| RemoteError::Endpoint {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })
    }

    /// Ask the service for an optimized copy and download it.
    pub fn optimize(&self, image: &ResolvedImage, quality: u32) -> Result<Vec<u8>, RemoteError> {
        let request = self.request_url(image, quality)?;
        let body = self.fetcher.fetch(request.as_str())?;

        let dest = serde_json::from_slice::<RemoteResponse>(&body)
            .ok()
            .and_then(|r| r.dest)
            .filter(|d| !d.trim().is_empty())
            .ok_or(RemoteError::MissingDestination)?;

        tracing::debug!(source = %image.public_src, %dest, "remote optimizer responded");
        self.fetcher.fetch(&dest)
    }
}

/// Absolute URL of a public source, for services outside the site.
pub fn absolute_source_url(public_src: &str, site: &SiteConfig) -> String {
    if public_src.contains("://") {
        return public_src.to_string();
    }
    if let Some(rest) = public_src.strip_prefix("//") {
        let scheme = Url::parse(&site.root_url)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        return format!("{scheme}://{rest}");
    }
    if public_src.starts_with('/') {
        return format!("{}{}", site.origin(), public_src);
    }
    format!("{}/{}", site.root_url.trim_end_matches('/'), public_src)
}
