//! # Authoritative State Source
//!
//! The read side the polling fallback fetches from while the push transport
//! is down. The production implementation is an HTTP client against the
//! producer's read endpoints, with exponential-backoff retries for
//! transient failures.

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::core::reconcile::DataType;

/// Custom error types for state fetches.
#[derive(Debug, Error)]
pub enum StateSourceError {
    #[error("Invalid state source URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("State fetch failed: {0}")]
    Http(String),
    #[error("State endpoint returned HTTP {status}")]
    Status { status: u16 },
    #[error("Failed to decode state response: {0}")]
    Decode(String),
}

/// Full-state read access for one data type.
pub trait StateSource: Send + Sync + 'static {
    /// Fetches the complete current collection for `data_type`.
    fn fetch_all(
        &self,
        data_type: DataType,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, StateSourceError>> + Send;
}

/// HTTP implementation against the producer's REST read endpoints.
pub struct HttpStateSource {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl HttpStateSource {
    /// Creates a client with a 3-attempt exponential backoff retry policy.
    ///
    /// `base_url` must be absolute and should end with a slash so relative
    /// paths join underneath it.
    pub fn new(base_url: &str) -> Result<Self, StateSourceError> {
        let base_url = Url::parse(base_url)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, base_url })
    }

    fn path_for(data_type: DataType) -> &'static str {
        match data_type {
            DataType::Orders => "orders",
            DataType::Notifications => "notifications",
            DataType::PriorityList => "priority",
        }
    }
}

impl StateSource for HttpStateSource {
    async fn fetch_all(&self, data_type: DataType) -> Result<Vec<Value>, StateSourceError> {
        let url = self.base_url.join(Self::path_for(data_type))?;

        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| StateSourceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StateSourceError::Status {
                status: status.as_u16(),
            });
        }

        // The priority endpoint serves a single document; the collection
        // endpoints serve arrays.
        match data_type {
            DataType::PriorityList => {
                let document = response
                    .json::<Value>()
                    .await
                    .map_err(|e| StateSourceError::Decode(e.to_string()))?;
                Ok(vec![document])
            }
            DataType::Orders | DataType::Notifications => response
                .json::<Vec<Value>>()
                .await
                .map_err(|e| StateSourceError::Decode(e.to_string())),
        }
    }
}
