//! Outbound traffic guards: duplicate suppression and rate limiting.
//!
//! Both structures are pure bookkeeping over injected `Instant`s so they
//! can be tested without sleeping; the sender holds them behind a mutex
//! because send attempts can be concurrent across message types.
//!
//! Policy: the rate limiter *queues* (bounded FIFO per target, preserving
//! enqueue order); only queue overflow rejects a send. This state is a
//! traffic guard, never a source of truth.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Result of a gated send, as reported back to the caller.
///
/// Callers must be able to tell "sent" from "skipped as duplicate";
/// failures travel separately as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The datagram was handed to the transport.
    Sent,
    /// An identical payload was sent to the same address within the
    /// dedupe window; this send was suppressed.
    SkippedDuplicate,
}

// ── DedupeCache ──────────────────────────────────────────────────

/// Remembers the fingerprint of the last payload sent to each address.
///
/// A send is a duplicate when the same address receives a payload with
/// the same fingerprint inside the window, measured from the last
/// non-suppressed send.
#[derive(Debug)]
pub struct DedupeCache {
    window: Duration,
    last: HashMap<String, (blake3::Hash, Instant)>,
}

/// Default duplicate-suppression window.
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_millis(50);

impl DedupeCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Check `payload` against the last send to `address`, recording it
    /// as the new last send unless it is a duplicate. Returns `true`
    /// when the send should be suppressed.
    pub fn is_duplicate(&mut self, address: &str, payload: &[u8]) -> bool {
        self.is_duplicate_at(Instant::now(), address, payload)
    }

    /// As [`is_duplicate`](Self::is_duplicate) with an explicit clock,
    /// for tests.
    pub fn is_duplicate_at(&mut self, now: Instant, address: &str, payload: &[u8]) -> bool {
        let fingerprint = blake3::hash(payload);
        if let Some((last_fp, at)) = self.last.get(address)
            && *last_fp == fingerprint
            && now.duration_since(*at) <= self.window
        {
            return true;
        }
        self.last
            .insert(address.to_string(), (fingerprint, now));
        false
    }

    /// Drop the remembered fingerprint for one address.
    ///
    /// Used to roll the gate back when a checked send never reached the
    /// transport; the failed attempt must not suppress the retry.
    pub fn forget(&mut self, address: &str) {
        self.last.remove(address);
    }

    /// Drop all remembered fingerprints.
    pub fn clear(&mut self) {
        self.last.clear();
    }
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_WINDOW)
    }
}

// ── TokenBucket ──────────────────────────────────────────────────

/// Classic token bucket: `capacity` burst, `refill_per_sec` sustained.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Take one token. `None` means the token was taken; `Some(wait)` is
    /// the time until one becomes available (nothing is consumed).
    pub fn try_acquire(&mut self) -> Option<Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// As [`try_acquire`](Self::try_acquire) with an explicit clock.
    pub fn try_acquire_at(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
    }
}
