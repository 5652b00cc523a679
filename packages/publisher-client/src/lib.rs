//! External publisher adapter seam.
//!
//! The core pipeline never speaks the external social-media protocol
//! directly. It depends only on the [`Publisher`] trait defined here.
//! Token lifecycle management and the actual HTTP integration against the
//! external service are the implementation's responsibility and are out of
//! scope for this crate; the only implementation shipped is
//! [`DryRunPublisher`], which performs no I/O and is suitable for tests and
//! for deployments running with `DRY_RUN=true`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a successful publish call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishOutcome {
    pub external_id: String,
    pub text: String,
    /// Permalink to the published post, when the endpoint exposes one.
    /// `None` in dry-run mode.
    pub url: Option<String>,
}

/// A metrics snapshot pulled from the external service. Not consumed by the
/// core pipeline; this is a hook for a future metrics-capture job.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExternalMetrics {
    pub impressions: i64,
    pub likes: i64,
    pub replies: i64,
    pub reposts: i64,
    pub bookmarks: i64,
}

/// Errors a publisher implementation can raise. The worker runtime matches
/// on this to decide retry vs dead-letter.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("transient publisher error: {0}")]
    Transient(String),

    #[error("permanent publisher error: {0}")]
    Permanent(String),
}

impl PublisherError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublisherError::Transient(_))
    }
}

/// Adapter seam for the external social-media endpoint.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `text` (optionally with media ids) and return the external
    /// post id. In dry-run mode the implementation must perform no I/O and
    /// return a synthetic id.
    async fn publish(
        &self,
        text: &str,
        media_ids: Option<&[String]>,
        dry_run: bool,
    ) -> Result<PublishOutcome, PublisherError>;

    /// Fetch metrics for a previously published post. Not called by the
    /// core pipeline; exposed as a hook for a future metrics-capture job.
    async fn get_metrics(
        &self,
        external_id: &str,
        dry_run: bool,
    ) -> Result<ExternalMetrics, PublisherError>;
}

/// Publisher that performs no I/O and always succeeds with a synthetic id
/// derived from the input text. Used when `DRY_RUN=true` (the default, see
/// `Config`) and in tests.
#[derive(Debug, Clone, Default)]
pub struct DryRunPublisher;

impl DryRunPublisher {
    pub fn new() -> Self {
        Self
    }

    fn synthetic_id(text: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        format!("dryrun-{:016x}", hasher.finish())
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(
        &self,
        text: &str,
        _media_ids: Option<&[String]>,
        _dry_run: bool,
    ) -> Result<PublishOutcome, PublisherError> {
        let external_id = Self::synthetic_id(text);
        tracing::debug!(external_id = %external_id, "dry-run publish");
        Ok(PublishOutcome {
            external_id,
            text: text.to_string(),
            url: None,
        })
    }

    async fn get_metrics(
        &self,
        external_id: &str,
        _dry_run: bool,
    ) -> Result<ExternalMetrics, PublisherError> {
        tracing::debug!(external_id = %external_id, "dry-run get_metrics");
        Ok(ExternalMetrics::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_publish_is_deterministic_per_text() {
        let publisher = DryRunPublisher::new();
        let a = publisher.publish("hello world", None, true).await.unwrap();
        let b = publisher.publish("hello world", None, true).await.unwrap();
        assert_eq!(a.external_id, b.external_id);
    }

    #[tokio::test]
    async fn dry_run_publish_differs_per_text() {
        let publisher = DryRunPublisher::new();
        let a = publisher.publish("hello", None, true).await.unwrap();
        let b = publisher.publish("world", None, true).await.unwrap();
        assert_ne!(a.external_id, b.external_id);
    }

    #[tokio::test]
    async fn dry_run_metrics_returns_zeroed_snapshot() {
        let publisher = DryRunPublisher::new();
        let metrics = publisher.get_metrics("dryrun-1", true).await.unwrap();
        assert_eq!(metrics, ExternalMetrics::default());
    }
}
