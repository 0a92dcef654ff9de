//! # genrelay
//!
//! Resilient external-call orchestration for content generation: call one of
//! several interchangeable, unreliable, rate-limited remote providers without
//! duplicating work or exceeding provider-imposed request budgets.
//!
//! ## Overview
//!
//! Three independent components, composed by the caller:
//!
//! - **Rate limiting**: a per-identity token bucket that caps throughput over
//!   a rolling window and in-flight concurrency, with an optional FIFO wait
//!   queue ([`ratelimit`]).
//! - **Provider fallback**: an ordered chain of providers attempted with
//!   bounded retries, capped exponential backoff, and a hard per-attempt
//!   timeout ([`provider`]).
//! - **Caching**: a uniform key-value contract with an in-process LRU variant
//!   and a networked variant, keyed by deterministic content hashes
//!   ([`cache`]).
//!
//! The components have no compile-time dependency on each other, so each is
//! independently testable and swappable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use genrelay::cache::{content_key, CacheConfig, ContentCache, KeyPurpose, MemoryCache};
//! use genrelay::provider::chain::{ChainConfig, ProviderChain};
//! use genrelay::provider::http::{HttpProvider, HttpProviderConfig};
//! use genrelay::provider::GenerationRequest;
//! use genrelay::ratelimit::{RateLimiter, RateLimiterConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> genrelay::Result<()> {
//!     let cache = MemoryCache::new(CacheConfig::new().with_namespace("content"));
//!     let limiter = RateLimiter::new(RateLimiterConfig::new(60, Duration::from_secs(60)));
//!     let chain = ProviderChain::new(
//!         vec![
//!             Arc::new(HttpProvider::new(HttpProviderConfig::new("primary"))),
//!             Arc::new(HttpProvider::new(HttpProviderConfig::new("backup"))),
//!         ],
//!         ChainConfig::new().with_timeout(Duration::from_secs(30)),
//!     );
//!
//!     let request = GenerationRequest::new("summarize this article");
//!     let key = content_key(KeyPurpose::Generation, &request.prompt);
//!
//!     // Cache first; on a miss, take a token, generate, store, release.
//!     if let Some(hit) = cache.get(&key).await? {
//!         println!("cached: {}", hit);
//!         return Ok(());
//!     }
//!     limiter.acquire().await?;
//!     let result = chain.generate(&request).await;
//!     limiter.release().await;
//!     let generation = result?;
//!     cache
//!         .set(&key, serde_json::to_value(&generation)?, None)
//!         .await?;
//!     println!("{}", generation.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`ratelimit`] | Token-bucket rate limiter with FIFO wait queue |
//! | [`provider`] | Provider contract, fallback chain, HTTP provider |
//! | [`cache`] | In-process and networked caches, content-key generation |
//! | [`error`] | Unified error taxonomy with structured context |

pub mod cache;
pub mod error;
pub mod provider;
pub mod ratelimit;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheStats, ContentCache, KeyPurpose, MemoryCache, RedisCache};
pub use error::{Error, ErrorContext};
pub use provider::chain::{ChainConfig, ChainStats, ProviderChain};
pub use provider::http::{HttpProvider, HttpProviderConfig};
pub use provider::{Generation, GenerationMeta, GenerationRequest, Provider, TokenUsage};
pub use ratelimit::{RateLimiter, RateLimiterConfig, RateLimiterStats};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
