//! Token-bucket rate limiting for outbound provider traffic.
//!
//! The limiter caps throughput over a rolling window *and* in-flight
//! concurrency, with an optional FIFO wait queue for callers that prefer to
//! wait for a token instead of failing fast.
//!
//! ```rust
//! use genrelay::ratelimit::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> genrelay::Result<()> {
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new(60, Duration::from_secs(60)).with_max_concurrent(4),
//! );
//!
//! limiter.acquire().await?;
//! // ... call the provider ...
//! limiter.release().await;
//! # Ok(())
//! # }
//! ```

pub mod token_bucket;

pub use token_bucket::{RateLimiter, RateLimiterConfig, RateLimiterStats};
