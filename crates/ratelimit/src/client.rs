use reqwest::{Client, Request, Response};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::RateLimitError;
use crate::limiter::RateLimiter;

/// HTTP client that passes every request through the bucket limiter
///
/// Waits for the request's bucket before sending and feeds the response
/// headers back, so learned limits apply to the next call on the same bucket.
#[derive(Clone)]
pub struct ThrottledClient {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl ThrottledClient {
    pub fn new(client: Client, limiter: Arc<RateLimiter>) -> Self {
        ThrottledClient { client, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Wait for admission, send `request` and record its rate-limit headers.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> Result<Response, RateLimitError> {
        let url = request.url().to_string();
        self.limiter.wait(cancel, &url).await?;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            response = self.client.execute(request) => response?,
        };

        self.limiter.observe(&url, response.headers());
        Ok(response)
    }

    /// GET `url` through the limiter
    pub async fn get(&self, cancel: &CancellationToken, url: &str) -> Result<Response, RateLimitError> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(|e| RateLimitError::InvalidUrl(e.to_string()))?;
        self.execute(cancel, request).await
    }
}
