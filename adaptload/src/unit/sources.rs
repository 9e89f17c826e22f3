//! Concrete unit sources.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, trace};

use super::{UnitFuture, UnitId, UnitPayload, UnitSource};
use crate::error::LoadError;

// =============================================================================
// Static
// =============================================================================

/// In-memory source with an optional artificial latency.
///
/// Units with no stored body resolve to an empty payload unless
/// [`strict`](Self::strict) is set, in which case they fail.
#[derive(Debug, Clone, Default)]
pub struct StaticUnitSource {
    bodies: HashMap<String, Bytes>,
    latency: Duration,
    strict: bool,
}

impl StaticUnitSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.bodies.insert(id.into(), body.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail for ids with no stored body.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl UnitSource for StaticUnitSource {
    fn resolve<'a>(&'a self, id: &'a UnitId) -> UnitFuture<'a> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.bodies.get(id.as_str()) {
                Some(body) => Ok(UnitPayload::new(id.clone(), body.clone())),
                None if self.strict => Err(LoadError::failure(id.as_str(), "no content")),
                None => Ok(UnitPayload::new(id.clone(), Bytes::new())),
            }
        })
    }
}

// =============================================================================
// Simulated
// =============================================================================

/// Source with randomized latency and failures, used by the `simulate`
/// command to exercise the coordinator under poor conditions.
#[derive(Debug, Clone)]
pub struct SimulatedUnitSource {
    min_latency: Duration,
    max_latency: Duration,
    failure_rate: f64,
}

impl SimulatedUnitSource {
    /// `failure_rate` is clamped to 0.0 - 1.0.
    pub fn new(min_latency: Duration, max_latency: Duration, failure_rate: f64) -> Self {
        Self {
            min_latency: min_latency.min(max_latency),
            max_latency: max_latency.max(min_latency),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::rng();
        let min = self.min_latency.as_millis() as u64;
        let max = self.max_latency.as_millis() as u64;
        let latency = Duration::from_millis(rng.random_range(min..=max));
        (latency, rng.random_bool(self.failure_rate))
    }
}

impl UnitSource for SimulatedUnitSource {
    fn resolve<'a>(&'a self, id: &'a UnitId) -> UnitFuture<'a> {
        // The rng is not Send, so roll before the first await.
        let (latency, fail) = self.roll();
        Box::pin(async move {
            trace!(unit = %id, latency_ms = latency.as_millis() as u64, fail, "Simulated resolve");
            tokio::time::sleep(latency).await;
            if fail {
                return Err(LoadError::failure(id.as_str(), "simulated failure"));
            }
            Ok(UnitPayload::new(id.clone(), format!("<section id=\"{}\"></section>", id)))
        })
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Fetches `{base_url}/{unit id}` over HTTP.
///
/// The request itself carries no timeout; the coordinator races every
/// resolve against the active strategy timeout.
#[derive(Debug, Clone)]
pub struct HttpUnitSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUnitSource {
    /// Create a source rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LoadError::failure("http", format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a source sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// URL requested for `id`.
    pub fn url_for(&self, id: &UnitId) -> String {
        format!("{}/{}", self.base_url, id.as_str())
    }
}

impl UnitSource for HttpUnitSource {
    fn resolve<'a>(&'a self, id: &'a UnitId) -> UnitFuture<'a> {
        Box::pin(async move {
            let url = self.url_for(id);
            debug!(unit = %id, url = %url, "Fetching unit");

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| LoadError::failure(id.as_str(), format!("Request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(LoadError::failure(
                    id.as_str(),
                    format!("HTTP {} from {}", response.status(), url),
                ));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| LoadError::failure(id.as_str(), format!("Failed to read response: {}", e)))?;
            Ok(UnitPayload::new(id.clone(), body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ContentUnit;

    #[tokio::test]
    async fn test_static_source_returns_stored_body() {
        let source = StaticUnitSource::new().with_body("hero", "<h1>Hi</h1>");
        let payload = source.resolve(&ContentUnit::Hero.into()).await.unwrap();
        assert_eq!(&payload.body[..], b"<h1>Hi</h1>");
    }

    #[tokio::test]
    async fn test_static_source_missing_body() {
        let lenient = StaticUnitSource::new();
        let payload = lenient.resolve(&ContentUnit::Faq.into()).await.unwrap();
        assert!(payload.body.is_empty());

        let strict = StaticUnitSource::new().strict();
        let err = strict.resolve(&ContentUnit::Faq.into()).await.unwrap_err();
        assert!(matches!(err, LoadError::ResolutionFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_source_latency() {
        let source = StaticUnitSource::new().with_latency(Duration::from_millis(250));
        let start = tokio::time::Instant::now();
        source.resolve(&ContentUnit::Menu.into()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_source_extremes() {
        let never = SimulatedUnitSource::new(Duration::from_millis(10), Duration::from_millis(20), 0.0);
        let always = SimulatedUnitSource::new(Duration::from_millis(10), Duration::from_millis(20), 1.0);
        let id: UnitId = ContentUnit::Cta.into();

        for _ in 0..10 {
            assert!(never.resolve(&id).await.is_ok());
            assert!(always.resolve(&id).await.is_err());
        }
    }

    #[test]
    fn test_simulated_source_normalizes_inputs() {
        let source = SimulatedUnitSource::new(Duration::from_millis(50), Duration::from_millis(10), 7.0);
        assert_eq!(source.min_latency, Duration::from_millis(10));
        assert_eq!(source.max_latency, Duration::from_millis(50));
        assert_eq!(source.failure_rate, 1.0);
    }

    #[test]
    fn test_http_source_url() {
        let source = HttpUnitSource::with_client(reqwest::Client::new(), "https://cdn.test/units/");
        assert_eq!(source.url_for(&ContentUnit::MainContent.into()), "https://cdn.test/units/main-content");
    }
}
