//! Lock-free token bucket shared by every caller of one named limiter.
//!
//! The bucket is a single timestamp: the moment the last token was handed
//! out. A caller may take the next token once `now` reaches
//! `last + rate`; the compare-and-swap guarantees exactly one caller wins
//! each slot.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use lockstep_core::RateSpec;
use tracing::warn;

use crate::error::{OrchestratorError, Result};

/// Monotonic tick source for [`GlobalRateLimiter`].
pub trait Clock: Send + Sync {
    /// Whether the clock never goes backwards.
    const IS_STEADY: bool;
    /// Length of one tick in nanoseconds.
    const TICK_NANOS: u64;

    fn now(&self) -> i64;
}

/// Production clock backed by [`Instant`].
///
/// All instances share one process-wide origin, so readings from different
/// instances are comparable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteadyClock;

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

impl Clock for SteadyClock {
    const IS_STEADY: bool = true;
    const TICK_NANOS: u64 = 1;

    fn now(&self) -> i64 {
        i64::try_from(origin().elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

#[repr(align(64))]
#[derive(Debug)]
struct CacheAligned<T>(T);

#[derive(Debug)]
pub struct GlobalRateLimiter<C: Clock = SteadyClock> {
    last_emptied: CacheAligned<AtomicI64>,
    spec: RateSpec,
    burst_size: u64,
    rate: i64,
    num_users: AtomicI64,
    clock: C,
}

impl GlobalRateLimiter<SteadyClock> {
    pub fn new(spec: RateSpec) -> Result<Self> {
        Self::with_clock(spec, SteadyClock)
    }
}

impl<C: Clock> GlobalRateLimiter<C> {
    pub fn with_clock(spec: RateSpec, clock: C) -> Result<Self> {
        if !C::IS_STEADY {
            return Err(OrchestratorError::config(
                "rate limiter",
                "Clock must be steady",
            ));
        }
        if C::TICK_NANOS != 1 {
            return Err(OrchestratorError::config(
                "rate limiter",
                format!(
                    "Clock tick must be exactly one nanosecond, got {}ns",
                    C::TICK_NANOS
                ),
            ));
        }

        let rate = spec.ticks_per_token();
        if rate == 0 {
            warn!(rate = %spec, "Rate is finer than one token per nanosecond and will not throttle");
        }
        // One slot in the past so the first caller succeeds immediately.
        let last_emptied = clock.now().saturating_sub(rate);
        Ok(Self {
            last_emptied: CacheAligned(AtomicI64::new(last_emptied)),
            spec,
            burst_size: spec.operations(),
            rate,
            num_users: AtomicI64::new(0),
            clock,
        })
    }

    /// Take one token if the bucket allows it at `now`. Never blocks.
    pub fn consume_if_within_rate(&self, now: i64) -> bool {
        let last_emptied = &self.last_emptied.0;
        let mut last = last_emptied.load(Ordering::SeqCst);
        loop {
            let candidate = last.saturating_add(self.rate);
            if now < candidate {
                return false;
            }
            match last_emptied.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    last = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// [`consume_if_within_rate`](Self::consume_if_within_rate) at the limiter's own clock.
    pub fn try_consume(&self) -> bool {
        self.consume_if_within_rate(self.clock.now())
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn spec(&self) -> RateSpec {
        self.spec
    }

    /// Advisory only; never enforced.
    pub fn burst_size(&self) -> u64 {
        self.burst_size
    }

    /// Ticks between two tokens.
    pub fn rate(&self) -> i64 {
        self.rate
    }

    pub fn rate_duration(&self) -> Duration {
        Duration::from_nanos(self.rate.max(0) as u64)
    }

    pub fn num_users(&self) -> i64 {
        self.num_users.load(Ordering::SeqCst)
    }

    /// Register one more call site sharing this limiter.
    pub fn add_user(&self) {
        self.num_users.fetch_add(1, Ordering::SeqCst);
    }
}
