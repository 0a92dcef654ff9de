//! Caller-side composition of cache, rate limiter, and provider chain:
//! cache lookup first, then token acquisition, generation with fallback,
//! store, release.

use async_trait::async_trait;
use genrelay::cache::{content_key, KeyPurpose};
use genrelay::{
    CacheConfig, ChainConfig, ContentCache, Error, ErrorContext, Generation, GenerationMeta,
    GenerationRequest, MemoryCache, Provider, ProviderChain, RateLimiter, RateLimiterConfig,
    TokenUsage,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

struct ScriptedProvider {
    name: String,
    fail_always: bool,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_always: false,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_always: true,
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_availability(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> genrelay::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(Error::provider_with_context(
                "scripted outage",
                ErrorContext::new().with_source("scripted_provider"),
            ));
        }
        Ok(Generation {
            content: format!("{} says: {}", self.name, request.prompt),
            usage: TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 6,
                total_tokens: 9,
            },
            meta: GenerationMeta {
                model: "scripted-1".to_string(),
                provider: self.name.clone(),
                timestamp_ms: 0,
                latency_ms: 1,
            },
        })
    }
}

/// The full caller-side control flow from the crate docs.
async fn generate_cached(
    cache: &MemoryCache,
    limiter: &RateLimiter,
    chain: &ProviderChain,
    request: &GenerationRequest,
) -> genrelay::Result<Generation> {
    let key = content_key(KeyPurpose::Generation, &request.prompt);
    if let Some(hit) = cache.get(&key).await? {
        return Ok(serde_json::from_value(hit)?);
    }

    limiter.acquire().await?;
    let result = chain.generate(request).await;
    limiter.release().await;
    let generation = result?;

    // Cache failures must never fail the generation path.
    let _ = cache
        .set(&key, serde_json::to_value(&generation)?, None)
        .await;
    Ok(generation)
}

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    init_tracing();
    let cache = MemoryCache::new(CacheConfig::new().with_namespace("orch").with_stats(true));
    let limiter = RateLimiter::new(RateLimiterConfig::new(100, Duration::from_secs(60)));
    let provider = ScriptedProvider::ok("primary");
    let chain = ProviderChain::new(vec![provider.clone()], ChainConfig::new());

    let request = GenerationRequest::new("describe a token bucket");
    let first = generate_cached(&cache, &limiter, &chain, &request)
        .await
        .unwrap();
    let second = generate_cached(&cache, &limiter, &chain, &request)
        .await
        .unwrap();

    assert_eq!(first.content, second.content);
    // The provider ran once; the second call never left the cache.
    assert_eq!(provider.call_count(), 1);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(chain.stats().total_requests, 1);

    // The limiter saw exactly one acquisition and it was released.
    let limiter_stats = limiter.stats().await;
    assert_eq!(limiter_stats.accepted_requests, 1);
    assert_eq!(limiter_stats.current_concurrent, 0);
    limiter.destroy().await;
}

#[tokio::test]
async fn fallback_result_is_cached_like_any_other() {
    init_tracing();
    let cache = MemoryCache::new(CacheConfig::new());
    let limiter = RateLimiter::new(RateLimiterConfig::new(100, Duration::from_secs(60)));
    let bad = ScriptedProvider::failing("bad");
    let good = ScriptedProvider::ok("good");
    let chain = ProviderChain::new(
        vec![bad.clone(), good.clone()],
        ChainConfig::new().with_max_retries(1),
    );

    let request = GenerationRequest::new("fall back please");
    let generation = generate_cached(&cache, &limiter, &chain, &request)
        .await
        .unwrap();
    assert_eq!(generation.meta.provider, "good");
    assert!(chain.stats().provider_failures["bad"] > 0);

    let key = content_key(KeyPurpose::Generation, &request.prompt);
    assert!(cache.has(&key).await.unwrap());
    limiter.destroy().await;
}

#[tokio::test]
async fn terminal_chain_failure_reaches_the_caller_and_releases_the_slot() {
    init_tracing();
    let cache = MemoryCache::new(CacheConfig::new());
    let limiter = RateLimiter::new(
        RateLimiterConfig::new(100, Duration::from_secs(60)).with_max_concurrent(1),
    );
    let chain = ProviderChain::new(
        vec![ScriptedProvider::failing("only")],
        ChainConfig::new().with_max_retries(1),
    );

    let request = GenerationRequest::new("doomed request");
    match generate_cached(&cache, &limiter, &chain, &request).await {
        Err(Error::AllProvidersFailed { failures }) => assert_eq!(failures.len(), 1),
        other => panic!("expected AllProvidersFailed, got {:?}", other.map(|_| ())),
    }

    // Nothing was cached and the concurrency slot came back.
    let key = content_key(KeyPurpose::Generation, &request.prompt);
    assert!(!cache.has(&key).await.unwrap());
    assert_eq!(limiter.stats().await.current_concurrent, 0);
    limiter.destroy().await;
}

#[tokio::test]
async fn rate_limit_rejection_precedes_provider_invocation() {
    init_tracing();
    let cache = MemoryCache::new(CacheConfig::new());
    let limiter = RateLimiter::new(
        RateLimiterConfig::new(1, Duration::from_secs(600)).with_queue_enabled(false),
    );
    let provider = ScriptedProvider::ok("primary");
    let chain = ProviderChain::new(vec![provider.clone()], ChainConfig::new());

    // Distinct prompts so the cache cannot absorb the second call; the
    // slot came back with the first release but the token is spent.
    generate_cached(&cache, &limiter, &chain, &GenerationRequest::new("first"))
        .await
        .unwrap();

    match generate_cached(&cache, &limiter, &chain, &GenerationRequest::new("second")).await {
        Err(Error::RateLimitExceeded) => {}
        other => panic!("expected RateLimitExceeded, got {:?}", other.map(|_| ())),
    }
    assert_eq!(provider.call_count(), 1);
    limiter.destroy().await;
}

#[tokio::test]
async fn cached_generation_round_trips_through_json() {
    init_tracing();
    let cache = MemoryCache::new(CacheConfig::new());
    let generation = Generation {
        content: "cached content".to_string(),
        usage: TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        },
        meta: GenerationMeta {
            model: "m".to_string(),
            provider: "p".to_string(),
            timestamp_ms: 1_700_000_000_000,
            latency_ms: 42,
        },
    };

    cache
        .set("roundtrip", serde_json::to_value(&generation).unwrap(), None)
        .await
        .unwrap();
    let back: Generation =
        serde_json::from_value(cache.get("roundtrip").await.unwrap().unwrap()).unwrap();
    assert_eq!(back.content, generation.content);
    assert_eq!(back.usage.total_tokens, 3);
    assert_eq!(back.meta.latency_ms, 42);
}
