use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests admitted per rolling window (bucket capacity).
    pub max_requests: u32,
    /// Rolling window duration over which the bucket fully refills.
    pub window: Duration,
    /// Maximum in-flight requests at any moment.
    pub max_concurrent: usize,
    /// Whether callers without a token wait in a FIFO queue.
    pub enable_queue: bool,
    /// Maximum queued waiters before `acquire` fails with `QueueFull`.
    pub max_queue_size: usize,
}

impl RateLimiterConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            max_concurrent: 10,
            enable_queue: true,
            max_queue_size: 100,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_queue_enabled(mut self, enabled: bool) -> Self {
        self.enable_queue = enabled;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    fn capacity(&self) -> f64 {
        self.max_requests as f64
    }
}

/// Point-in-time view of limiter counters.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub accepted_requests: u64,
    pub rejected_requests: u64,
    pub queued_requests: u64,
    pub current_concurrent: usize,
    pub current_queue_depth: usize,
    /// Tokens remaining in the bucket after the latest lazy refill.
    pub current_tokens: f64,
    /// Running average time a dequeued waiter spent in the queue (ms).
    pub avg_wait_ms: f64,
}

struct Waiter {
    tx: oneshot::Sender<Result<()>>,
    enqueued_at: Instant,
}

struct State {
    tokens: f64,
    last_refill: Instant,
    in_flight: usize,
    queue: VecDeque<Waiter>,
    closed: bool,
    accepted: u64,
    rejected: u64,
    queued: u64,
    avg_wait_ms: f64,
    waits_served: u64,
}

/// Per-identity token bucket with a concurrency cap and FIFO wait queue.
///
/// Must be constructed inside a Tokio runtime; `new` spawns the housekeeping
/// tick.
///
/// Tokens refill continuously and lazily:
/// `tokens = min(capacity, tokens + capacity * elapsed / window)`, recomputed
/// on every acquire and on a 1-second housekeeping tick that also drains the
/// wait queue. No other polling takes place.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Arc<Mutex<State>>,
    housekeeping: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = Arc::new(Mutex::new(State {
            tokens: cfg.capacity(),
            last_refill: Instant::now(),
            in_flight: 0,
            queue: VecDeque::new(),
            closed: false,
            accepted: 0,
            rejected: 0,
            queued: 0,
            avg_wait_ms: 0.0,
            waits_served: 0,
        }));

        let tick_state = Arc::clone(&state);
        let tick_cfg = cfg.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let mut st = tick_state.lock().await;
                if st.closed {
                    break;
                }
                Self::drain_queue_locked(&tick_cfg, &mut st);
            }
        });

        Self {
            cfg,
            state,
            housekeeping: std::sync::Mutex::new(Some(handle)),
        }
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let window_secs = cfg.window.as_secs_f64();
        if window_secs <= 0.0 {
            st.tokens = cfg.capacity();
            st.last_refill = now;
            return;
        }
        let elapsed = now.duration_since(st.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + cfg.capacity() * elapsed / window_secs).min(cfg.capacity());
            st.last_refill = now;
        }
    }

    fn can_admit(cfg: &RateLimiterConfig, st: &State) -> bool {
        st.tokens >= 1.0 && st.in_flight < cfg.max_concurrent
    }

    fn consume_locked(st: &mut State) {
        st.tokens -= 1.0;
        st.in_flight += 1;
        st.accepted += 1;
    }

    /// Hand tokens to queued waiters, oldest first, while budget allows.
    fn drain_queue_locked(cfg: &RateLimiterConfig, st: &mut State) {
        Self::refill_locked(cfg, st);
        loop {
            // Waiters whose receiver vanished (caller cancelled) are dropped
            // without consuming a token.
            match st.queue.front() {
                Some(w) if w.tx.is_closed() => {
                    st.queue.pop_front();
                    continue;
                }
                Some(_) if Self::can_admit(cfg, st) => {
                    let waiter = st.queue.pop_front().expect("front checked above");
                    Self::consume_locked(st);
                    let waited = waiter.enqueued_at.elapsed().as_millis() as f64;
                    st.waits_served += 1;
                    let n = st.waits_served as f64;
                    st.avg_wait_ms = (st.avg_wait_ms * (n - 1.0) + waited) / n;
                    let _ = waiter.tx.send(Ok(()));
                }
                _ => break,
            }
        }
    }

    /// Acquire one token, suspending in FIFO order if none is available.
    ///
    /// Fails immediately with [`Error::RateLimitExceeded`] when queueing is
    /// disabled, with [`Error::QueueFull`] when the queue is at capacity, and
    /// with [`Error::LimiterClosed`] once the limiter has been destroyed.
    pub async fn acquire(&self) -> Result<()> {
        let rx = {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(Error::LimiterClosed);
            }
            Self::refill_locked(&self.cfg, &mut st);

            if st.queue.is_empty() && Self::can_admit(&self.cfg, &st) {
                Self::consume_locked(&mut st);
                return Ok(());
            }

            if !self.cfg.enable_queue {
                st.rejected += 1;
                debug!(
                    tokens = st.tokens,
                    in_flight = st.in_flight,
                    "rate limit exceeded, queueing disabled"
                );
                return Err(Error::RateLimitExceeded);
            }
            if st.queue.len() >= self.cfg.max_queue_size {
                st.rejected += 1;
                warn!(
                    queue_depth = st.queue.len(),
                    "rate limiter wait queue is full"
                );
                return Err(Error::QueueFull {
                    max_queue_size: self.cfg.max_queue_size,
                });
            }

            let (tx, rx) = oneshot::channel();
            st.queue.push_back(Waiter {
                tx,
                enqueued_at: Instant::now(),
            });
            st.queued += 1;
            rx
        };

        match rx.await {
            Ok(result) => result,
            // Sender dropped without resolution: only possible when the
            // limiter is torn down mid-flight.
            Err(_) => Err(Error::LimiterClosed),
        }
    }

    /// Non-suspending acquire. Returns `true` iff a token and a concurrency
    /// slot were both available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.closed {
            return false;
        }
        Self::refill_locked(&self.cfg, &mut st);
        // Never jump ahead of queued waiters.
        if st.queue.is_empty() && Self::can_admit(&self.cfg, &st) {
            Self::consume_locked(&mut st);
            true
        } else {
            false
        }
    }

    /// Return one concurrency slot and immediately try to satisfy the head
    /// of the wait queue.
    pub async fn release(&self) {
        let mut st = self.state.lock().await;
        st.in_flight = st.in_flight.saturating_sub(1);
        if !st.closed {
            Self::drain_queue_locked(&self.cfg, &mut st);
        }
    }

    /// Stop the housekeeping tick and reject every queued waiter with
    /// [`Error::LimiterClosed`]. Idempotent; no waiter is left unresolved.
    pub async fn destroy(&self) {
        let drained = {
            let mut st = self.state.lock().await;
            if st.closed {
                return;
            }
            st.closed = true;
            std::mem::take(&mut st.queue)
        };
        let rejected = drained.len();
        for waiter in drained {
            let _ = waiter.tx.send(Err(Error::LimiterClosed));
        }
        if rejected > 0 {
            warn!(rejected, "rate limiter destroyed with queued waiters");
        }
        if let Ok(mut guard) = self.housekeeping.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut st = self.state.lock().await;
        if !st.closed {
            Self::refill_locked(&self.cfg, &mut st);
        }
        RateLimiterStats {
            accepted_requests: st.accepted,
            rejected_requests: st.rejected,
            queued_requests: st.queued,
            current_concurrent: st.in_flight,
            current_queue_depth: st.queue.len(),
            current_tokens: st.tokens,
            avg_wait_ms: st.avg_wait_ms,
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.housekeeping.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn small(max_requests: u32, window_ms: u64) -> RateLimiterConfig {
        RateLimiterConfig::new(max_requests, Duration::from_millis(window_ms))
    }

    #[tokio::test]
    async fn test_config_defaults() {
        let cfg = small(60, 60_000);
        assert_eq!(cfg.max_concurrent, 10);
        assert!(cfg.enable_queue);
        assert_eq!(cfg.max_queue_size, 100);
    }

    #[tokio::test]
    async fn test_try_acquire_exhausts_burst() {
        let limiter = RateLimiter::new(small(3, 60_000));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_accepted_never_exceeds_window_budget() {
        let limiter = RateLimiter::new(small(5, 60_000).with_max_concurrent(100));
        let mut admitted = 0;
        for _ in 0..20 {
            if limiter.try_acquire().await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(limiter.stats().await.accepted_requests, 5);
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_refill_restores_full_capacity() {
        let limiter = RateLimiter::new(small(4, 50));
        for _ in 0..4 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        // A full window with no acquisitions resets the bucket to capacity.
        tokio::time::sleep(Duration::from_millis(70)).await;
        let stats = limiter.stats().await;
        assert!((stats.current_tokens - 4.0).abs() < 1e-9);
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_concurrency_cap_independent_of_tokens() {
        let limiter = RateLimiter::new(small(100, 1_000).with_max_concurrent(2));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        // Tokens remain but both concurrency slots are taken.
        assert!(!limiter.try_acquire().await);

        limiter.release().await;
        assert!(limiter.try_acquire().await);
        assert!(limiter.stats().await.current_concurrent <= 2);
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_queue_disabled_fails_fast() {
        let limiter = RateLimiter::new(small(1, 60_000).with_queue_enabled(false));
        assert_ok!(limiter.acquire().await);
        match limiter.acquire().await {
            Err(Error::RateLimitExceeded) => {}
            other => panic!("expected RateLimitExceeded, got {:?}", other.err()),
        }
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_queue_full_fails_fast() {
        let limiter = RateLimiter::new(small(1, 600_000).with_max_queue_size(1));
        assert_ok!(limiter.acquire().await);

        let limiter = Arc::new(limiter);
        let l2 = Arc::clone(&limiter);
        let queued = tokio::spawn(async move { l2.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        match limiter.acquire().await {
            Err(Error::QueueFull { max_queue_size }) => assert_eq!(max_queue_size, 1),
            other => panic!("expected QueueFull, got {:?}", other.err()),
        }

        limiter.destroy().await;
        assert!(matches!(queued.await.unwrap(), Err(Error::LimiterClosed)));
    }

    #[tokio::test]
    async fn test_release_wakes_queued_waiter_in_fifo_order() {
        let limiter = Arc::new(RateLimiter::new(
            small(100, 1_000).with_max_concurrent(1),
        ));
        assert_ok!(limiter.acquire().await);

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for i in 0..3 {
            let l = Arc::clone(&limiter);
            let tx = order_tx.clone();
            handles.push(tokio::spawn(async move {
                l.acquire().await.unwrap();
                tx.send(i).unwrap();
                l.release().await;
            }));
            // Give each task time to enqueue before the next arrives.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        limiter.release().await;
        for h in handles {
            h.await.unwrap();
        }
        let mut served = Vec::new();
        while let Ok(i) = order_rx.try_recv() {
            served.push(i);
        }
        assert_eq!(served, vec![0, 1, 2]);
        limiter.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_rejects_all_waiters() {
        let limiter = Arc::new(RateLimiter::new(small(1, 600_000)));
        assert_ok!(limiter.acquire().await);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let l = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        limiter.destroy().await;
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(Error::LimiterClosed)));
        }
        // Terminal: later acquires fail the same way.
        assert!(matches!(limiter.acquire().await, Err(Error::LimiterClosed)));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let limiter = RateLimiter::new(small(1, 1_000));
        limiter.destroy().await;
        limiter.destroy().await;
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_wait_time_recorded_for_queued_requests() {
        let limiter = Arc::new(RateLimiter::new(
            small(100, 1_000).with_max_concurrent(1),
        ));
        assert_ok!(limiter.acquire().await);

        let l = Arc::clone(&limiter);
        let waiter = tokio::spawn(async move { l.acquire().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.release().await;
        waiter.await.unwrap().unwrap();

        let stats = limiter.stats().await;
        assert_eq!(stats.queued_requests, 1);
        assert!(stats.avg_wait_ms >= 20.0);
        limiter.destroy().await;
    }
}
