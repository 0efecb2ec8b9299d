//! Token-bucket throttling.
//!
//! # Responsibilities
//! - Lock-free token bucket with refill over a fixed window
//! - One bucket per partition key (global, or e.g. per client IP)
//! - `429 Too Many Requests` with `Retry-After` when a bucket is empty
//!
//! # Design Decisions
//! - Bucket state is one immutable value replaced by compare-and-swap; a
//!   consumer that loses the race recomputes from the fresh state and the
//!   current time
//! - Time comes from an injected `Clock`
//! - At most once per window, buckets that have refilled completely and
//!   that no request is holding are dropped; a full bucket is
//!   indistinguishable from a fresh one, so partitions that went quiet do
//!   not accumulate
//! - A request whose partition key cannot be computed is answered with a
//!   500; it is never let through unthrottled

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use dashmap::DashMap;

use crate::context::Context;
use crate::error::GatewayError;
use crate::handler::{Expression, Filter, Handler, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::observability::metrics;
use crate::promise::Promise;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BucketState {
    counter: u64,
    last_refill: u64,
}

/// A bucket of `capacity` tokens refilled evenly over `duration`.
pub struct TokenBucket {
    state: ArcSwap<BucketState>,
    capacity: u64,
    ms_per_token: f64,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// A full bucket. `capacity` and `duration` must be non-zero.
    pub fn new(capacity: u64, duration: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let ms_per_token = (duration.as_millis() as f64 / capacity as f64).max(f64::MIN_POSITIVE);
        let now = clock.now_ms();
        Self {
            state: ArcSwap::from_pointee(BucketState {
                counter: capacity,
                last_refill: now,
            }),
            capacity,
            ms_per_token,
            clock,
        }
    }

    /// Take one token. Returns 0 on success, otherwise the number of
    /// milliseconds until a token becomes available.
    pub fn try_consume(&self) -> u64 {
        loop {
            let current = self.state.load();
            let now = self.clock.now_ms();
            let refilled = self.refill(&current, now);

            if refilled.counter == 0 {
                let since_refill = now.saturating_sub(refilled.last_refill) as f64;
                let wait = (self.ms_per_token - since_refill).ceil();
                return (wait as u64).max(1);
            }

            let next = Arc::new(BucketState {
                counter: refilled.counter - 1,
                last_refill: refilled.last_refill,
            });
            let previous = self.state.compare_and_swap(&*current, next);
            if Arc::ptr_eq(&*previous, &*current) {
                return 0;
            }
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> u64 {
        self.refill(&self.state.load(), self.clock.now_ms()).counter
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// True once the bucket has refilled to capacity.
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }

    fn refill(&self, state: &BucketState, now: u64) -> BucketState {
        let elapsed = now.saturating_sub(state.last_refill) as f64;
        let tokens = (elapsed / self.ms_per_token).floor() as u64;
        if tokens == 0 {
            return *state;
        }

        let counter = state.counter.saturating_add(tokens).min(self.capacity);
        let last_refill = if counter == self.capacity {
            now
        } else {
            state.last_refill + (tokens as f64 * self.ms_per_token) as u64
        };
        BucketState {
            counter,
            last_refill,
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("state", &**self.state.load())
            .field("capacity", &self.capacity)
            .field("ms_per_token", &self.ms_per_token)
            .finish()
    }
}

/// Rejects requests exceeding `capacity` per `duration` for their partition.
pub struct ThrottlingFilter {
    partition: Expression<String>,
    buckets: DashMap<String, Arc<TokenBucket>>,
    capacity: u64,
    duration: Duration,
    clock: Arc<dyn Clock>,
    last_sweep: AtomicU64,
}

impl ThrottlingFilter {
    pub fn new(capacity: u64, duration: Duration, partition: Expression<String>) -> Self {
        Self::with_clock(capacity, duration, partition, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        capacity: u64,
        duration: Duration,
        partition: Expression<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            partition,
            buckets: DashMap::new(),
            capacity,
            duration,
            clock,
            last_sweep: AtomicU64::new(now),
        }
    }

    /// A single bucket shared by every request.
    pub fn global(capacity: u64, duration: Duration) -> Self {
        Self::new(capacity, duration, Expression::constant("global".to_string()))
    }

    /// Number of partitions currently holding a bucket.
    pub fn partitions(&self) -> usize {
        self.buckets.len()
    }

    /// Drop full, unreferenced buckets if a window has passed since the
    /// last sweep. Only the caller winning the timestamp swap sweeps.
    fn sweep(&self) {
        let now = self.clock.now_ms();
        let last = self.last_sweep.load(Ordering::Relaxed);
        let interval = (self.duration.as_millis() as u64).max(1);
        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.buckets.len();
        // The shard lock is held during retain, so a count of one means no
        // request can still be consuming from the bucket.
        self.buckets
            .retain(|_, bucket| Arc::strong_count(bucket) > 1 || !bucket.is_full());
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "Evicted idle throttling partitions");
        }
    }

    fn bucket(&self, key: &str) -> Arc<TokenBucket> {
        self.sweep();
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.clone();
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(self.capacity, self.duration, self.clock.clone()))
            })
            .clone()
    }
}

impl Filter for ThrottlingFilter {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        let key = match self.partition.evaluate(&context, &request) {
            Some(key) => key,
            None => {
                tracing::error!("Throttling partition key could not be computed");
                return Promise::result(Response::new_internal_server_error_with_cause(
                    GatewayError::Internal("missing throttling partition key".into()),
                ));
            }
        };

        let delay = self.bucket(&key).try_consume();
        if delay == 0 {
            return next.handle(context, request);
        }

        let retry_after = delay.div_ceil(1000).max(1);
        tracing::warn!(partition = %key, delay_ms = delay, "Request throttled");
        metrics::record_throttled(&key);

        let mut response = Response::new(StatusCode::TOO_MANY_REQUESTS);
        response
            .headers
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        Promise::result(response)
    }
}

impl fmt::Debug for ThrottlingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlingFilter")
            .field("capacity", &self.capacity)
            .field("duration", &self.duration)
            .field("partitions", &self.buckets.len())
            .finish()
    }
}
