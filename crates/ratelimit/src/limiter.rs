//! Per-bucket rate limiter
//!
//! One token bucket per canonical bucket key, created lazily from the
//! rate-limit headers the server attaches to responses. Until a bucket has
//! been observed there is nothing to throttle on and `wait` returns at once.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bucket_key::bucket_key;
use crate::error::RateLimitError;
use crate::token_bucket::TokenBucket;

pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";

/// The four rate-limit headers of one response
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHeaders {
    /// Opaque server bucket id
    pub bucket: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl RateLimitHeaders {
    /// Parse the headers; `None` if any of them is absent or malformed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let bucket = text(HEADER_BUCKET)?.to_string();
        let limit = text(HEADER_LIMIT)?.trim().parse().ok()?;
        let remaining = text(HEADER_REMAINING)?.trim().parse().ok()?;
        let reset_after: f64 = text(HEADER_RESET_AFTER)?.trim().parse().ok()?;
        let reset_after = Duration::try_from_secs_f64(reset_after).ok()?;

        Some(RateLimitHeaders {
            bucket,
            limit,
            remaining,
            reset_after,
        })
    }

    /// First decrement from a full bucket
    fn is_first_decrement(&self) -> bool {
        self.limit > 0 && self.remaining == self.limit - 1
    }
}

/// Snapshot of one bucket's configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BucketState {
    /// Canonical bucket key
    pub key: String,
    /// Server bucket id from the last reconfiguration
    pub bucket_id: String,
    pub capacity: u32,
    pub window: Duration,
}

struct Bucket {
    bucket_id: String,
    tokens: TokenBucket,
}

/// Keyed registry of token buckets, locked per bucket
pub struct RateLimiter {
    api_prefix: String,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl RateLimiter {
    /// `api_prefix` is the scheme, host and base path stripped from request
    /// URLs before canonicalization (e.g. `https://host/api/v10`).
    pub fn new(api_prefix: impl Into<String>) -> Self {
        RateLimiter {
            api_prefix: api_prefix.into(),
            buckets: DashMap::new(),
        }
    }

    /// Canonical bucket key for a request URL
    pub fn key(&self, url: &str) -> String {
        bucket_key(url, &self.api_prefix)
    }

    /// Block until the bucket for `url` admits one request.
    ///
    /// Returns immediately when the bucket has not been observed yet.
    pub async fn wait(&self, cancel: &CancellationToken, url: &str) -> Result<(), RateLimitError> {
        let key = self.key(url);
        let Some(bucket) = self.buckets.get(&key).map(|b| Arc::clone(b.value())) else {
            return Ok(());
        };

        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let wait = match bucket.lock().tokens.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            log::trace!("Bucket {} exhausted, waiting {:?}", key, wait);

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Feed the rate-limit headers of a response for `url` back into the
    /// limiter.
    ///
    /// Only the first decrement from a full bucket (`remaining == limit - 1`)
    /// configures state: the bucket is created, or its capacity and window are
    /// replaced when the server reports a different limit.
    pub fn observe(&self, url: &str, headers: &HeaderMap) {
        let Some(headers) = RateLimitHeaders::from_headers(headers) else {
            return;
        };
        if !headers.is_first_decrement() {
            return;
        }

        let key = self.key(url);
        match self.buckets.entry(key) {
            Entry::Occupied(entry) => {
                let mut bucket = entry.get().lock();
                let changed = bucket.tokens.capacity() != headers.limit
                    || bucket.tokens.window() != headers.reset_after;
                if changed {
                    log::debug!(
                        "Reconfiguring bucket {} ({}): {} per {:?}",
                        entry.key(),
                        headers.bucket,
                        headers.limit,
                        headers.reset_after
                    );
                    bucket.tokens.reconfigure(headers.limit, headers.reset_after);
                }
                bucket.bucket_id = headers.bucket;
            }
            Entry::Vacant(entry) => {
                log::debug!(
                    "Creating bucket {} ({}): {} per {:?}",
                    entry.key(),
                    headers.bucket,
                    headers.limit,
                    headers.reset_after
                );
                entry.insert(Arc::new(Mutex::new(Bucket {
                    tokens: TokenBucket::new(headers.limit, headers.reset_after, headers.remaining),
                    bucket_id: headers.bucket,
                })));
            }
        }
    }

    /// Configuration snapshot of the bucket stored under `key`
    pub fn bucket(&self, key: &str) -> Option<BucketState> {
        self.buckets.get(key).map(|entry| {
            let bucket = entry.value().lock();
            BucketState {
                key: entry.key().clone(),
                bucket_id: bucket.bucket_id.clone(),
                capacity: bucket.tokens.capacity(),
                window: bucket.tokens.window(),
            }
        })
    }

    /// Number of known buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
