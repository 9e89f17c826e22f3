//! Image probes.
//!
//! A probe fetches an image URL and reports whether it decoded. The HTTP
//! probe treats any successful response with a body as loaded.

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::LoadError;

/// Fetches one image URL.
pub trait ImageProbe: Send + Sync {
    /// Resolve `url`, returning the number of bytes received.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, LoadError>>;
}

/// Probe backed by a shared `reqwest` client.
///
/// Root-relative URLs are joined onto `origin` when one is set.
#[derive(Debug, Clone)]
pub struct HttpImageProbe {
    client: reqwest::Client,
    origin: Option<String>,
}

impl HttpImageProbe {
    pub fn new() -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LoadError::failure("image", format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client, origin: None }
    }

    /// Resolve root-relative URLs against `origin`.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into().trim_end_matches('/').to_string());
        self
    }

    /// Absolute URL requested for `url`.
    pub fn absolute_url(&self, url: &str) -> String {
        match &self.origin {
            Some(origin) if url.starts_with('/') => format!("{}{}", origin, url),
            _ => url.to_string(),
        }
    }
}

impl ImageProbe for HttpImageProbe {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, LoadError>> {
        Box::pin(async move {
            let target = self.absolute_url(url);
            debug!(url = %target, "Probing image");

            let response = self
                .client
                .get(&target)
                .send()
                .await
                .map_err(|e| LoadError::failure(url, format!("Request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(LoadError::failure(
                    url,
                    format!("HTTP {} from {}", response.status(), target),
                ));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| LoadError::failure(url, format!("Failed to read response: {}", e)))?;
            if body.is_empty() {
                return Err(LoadError::failure(url, "Empty image body"));
            }
            Ok(body.len() as u64)
        })
    }
}
