//! Publishing boundary
//!
//! The bot hands catalog listings to an external classifieds gateway through
//! [`Publisher`]. [`HttpPublisher`] talks JSON over HTTP, and
//! [`GuardedPublisher`] wraps any publisher with bounded retries, a
//! per-attempt timeout and a [`CircuitBreaker`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{PublishConfig, RecoveryConfig};
use crate::errors::PublishError;
use crate::model::ListingFields;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Uploads images by URL and returns gateway photo references in the same order
    async fn upload_images(&self, urls: &[String]) -> Result<Vec<String>, PublishError>;

    /// Publishes a listing and returns its gateway id
    async fn publish_listing(&self, fields: &ListingFields) -> Result<String, PublishError>;
}

/// Used when no gateway is configured
pub struct DisabledPublisher;

#[async_trait]
impl Publisher for DisabledPublisher {
    async fn upload_images(&self, _urls: &[String]) -> Result<Vec<String>, PublishError> {
        Err(PublishError::Disabled)
    }

    async fn publish_listing(&self, _fields: &ListingFields) -> Result<String, PublishError> {
        Err(PublishError::Disabled)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    photo_refs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    listing_id: String,
}

/// JSON-over-HTTP gateway client
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPublisher {
    pub fn new(config: &PublishConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, PublishError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(format!("{status}: {detail}")));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn upload_images(&self, urls: &[String]) -> Result<Vec<String>, PublishError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let response: UploadResponse = self.post("photos", json!({ "urls": urls })).await?;
        Ok(response.photo_refs)
    }

    async fn publish_listing(&self, fields: &ListingFields) -> Result<String, PublishError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| PublishError::Rejected(format!("unserializable listing: {e}")))?;
        let response: ListingResponse = self.post("listings", body).await?;
        Ok(response.listing_id)
    }
}

/// Retry, timeout and circuit breaker around another publisher
pub struct GuardedPublisher<P> {
    inner: P,
    breaker: CircuitBreaker,
    config: RecoveryConfig,
}

impl<P: Publisher> GuardedPublisher<P> {
    pub fn new(inner: P, config: RecoveryConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config.clone()),
            config,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, PublishError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PublishError>>,
    {
        let timeout = Duration::from_secs(self.config.operation_timeout_secs);
        let mut attempt = 0;

        loop {
            if self.breaker.is_open() {
                warn!(operation, "Circuit breaker is open, skipping publishing call");
                return Err(PublishError::CircuitOpen);
            }

            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout(self.config.operation_timeout_secs)),
            };

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    debug!(operation, attempt, "Publishing call succeeded");
                    return Ok(value);
                }
                // Nothing to retry against
                Err(PublishError::Disabled) => return Err(PublishError::Disabled),
                Err(e) => e,
            };

            self.breaker.record_failure();
            if attempt > self.config.max_retries {
                warn!(operation, attempt, error = %error, "Publishing call failed, giving up");
                return Err(error);
            }

            let backoff = self.config.backoff_ms(attempt);
            let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
            info!(
                operation,
                attempt,
                error = %error,
                retry_in_ms = backoff + jitter,
                "Publishing call failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
        }
    }
}

#[async_trait]
impl<P: Publisher> Publisher for GuardedPublisher<P> {
    async fn upload_images(&self, urls: &[String]) -> Result<Vec<String>, PublishError> {
        self.guarded("upload_images", || self.inner.upload_images(urls))
            .await
    }

    async fn publish_listing(&self, fields: &ListingFields) -> Result<String, PublishError> {
        self.guarded("publish_listing", || self.inner.publish_listing(fields))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Publisher for Flaky {
        async fn upload_images(&self, urls: &[String]) -> Result<Vec<String>, PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PublishError::Rejected("busy".to_string()))
            } else {
                Ok(urls.iter().map(|u| format!("ref:{u}")).collect())
            }
        }

        async fn publish_listing(&self, _fields: &ListingFields) -> Result<String, PublishError> {
            Ok("L-1".to_string())
        }
    }

    fn fast_config(max_retries: u32) -> RecoveryConfig {
        RecoveryConfig {
            max_retries,
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let publisher = GuardedPublisher::new(
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            fast_config(3),
        );

        let refs = publisher.upload_images(&["a.jpg".to_string()]).await.unwrap();
        assert_eq!(refs, vec!["ref:a.jpg".to_string()]);
        assert_eq!(publisher.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let publisher = GuardedPublisher::new(
            Flaky {
                failures: 10,
                calls: AtomicU32::new(0),
            },
            fast_config(1),
        );

        let result = publisher.upload_images(&["a.jpg".to_string()]).await;
        assert!(matches!(result, Err(PublishError::Rejected(_))));
        assert_eq!(publisher.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_is_not_retried() {
        let publisher = GuardedPublisher::new(DisabledPublisher, fast_config(3));
        let fields = ListingFields {
            title: "KAMAZ".to_string(),
            description: String::new(),
            price: 1,
            photos: Vec::new(),
        };
        let result = publisher.publish_listing(&fields);
        assert!(matches!(result.await, Err(PublishError::Disabled)));
        assert_eq!(publisher.circuit_breaker().failure_count(), 0);
    }
}
