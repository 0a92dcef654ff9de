use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Additional context about the error (e.g., provider name, cache key).
    pub details: Option<String>,
    /// Source of the error (e.g., "token_bucket", "provider_chain").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the orchestration layer.
///
/// Terminal errors (`AllProvidersFailed`, `NoAvailableProviders`,
/// `LimiterClosed`) are the only failures a caller is expected to see from a
/// full generation path; everything else is either surfaced immediately at
/// the call site (`RateLimitExceeded`, `QueueFull`, `CacheUnreachable`) or
/// recovered internally by retry and fallback.
#[derive(Debug, Error)]
pub enum Error {
    #[error("rate limit exceeded: no token available and queueing is disabled")]
    RateLimitExceeded,

    #[error("rate limiter wait queue is full ({max_queue_size} waiters)")]
    QueueFull { max_queue_size: usize },

    #[error("rate limiter destroyed while request was pending")]
    LimiterClosed,

    #[error("provider '{provider}' attempt timed out after {timeout_ms}ms")]
    AttemptTimeout { provider: String, timeout_ms: u64 },

    #[error("provider '{provider}' reported unavailable")]
    ProviderUnavailable { provider: String },

    #[error("no providers are currently available")]
    NoAvailableProviders,

    #[error("all providers failed: {}", format_failures(.failures))]
    AllProvidersFailed {
        /// `(provider identity, last error message)` per exhausted provider.
        failures: Vec<(String, String)>,
    },

    #[error("cache backing store unreachable: {message}")]
    CacheUnreachable { message: String },

    #[error("provider error: {message}{}", format_context(.context))]
    Provider {
        message: String,
        context: ErrorContext,
    },

    #[error("runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(provider, message)| format!("{}: {}", provider, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a new runtime error with structured context.
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new provider error with structured context.
    pub fn provider_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Provider {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Provider { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether this error is terminal for a whole `generate()` call, as
    /// opposed to a single-attempt failure recovered by retry/fallback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::AllProvidersFailed { .. } | Error::NoAvailableProviders | Error::LimiterClosed
        )
    }
}
