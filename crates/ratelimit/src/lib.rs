//! Herald Rate Limit
//!
//! Admission control for the REST path. The server declares per-resource
//! limits through response headers; this crate maps request URLs onto the
//! buckets those limits apply to and throttles callers accordingly.
//!
//! ```text
//!  request URL ──► bucket_key() ──► RateLimiter::wait()  ──► send
//!                                        ▲                    │
//!                                        └── observe(headers) ◄┘
//! ```
//!
//! - [`bucket_key`]: canonical key for a URL (ids and emoji blanked, major
//!   parameters kept)
//! - [`RateLimiter`]: one token bucket per key, configured from headers
//! - [`IdentifyLimiter`]: global admission for gateway identify operations
//! - [`ThrottledClient`]: `reqwest` client wired through the limiter

pub mod bucket_key;
pub mod client;
pub mod error;
pub mod identify;
pub mod limiter;
mod token_bucket;

pub use bucket_key::bucket_key;
pub use client::ThrottledClient;
pub use error::RateLimitError;
pub use identify::{DEFAULT_IDENTIFY_PERIOD, IdentifyLimiter};
pub use limiter::{
    BucketState, HEADER_BUCKET, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET_AFTER,
    RateLimitHeaders, RateLimiter,
};
