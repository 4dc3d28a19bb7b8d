//! Capability interface for time.
//!
//! Per the constructor-injection design note: the source's process-wide
//! clock singleton becomes a small trait the session layer is built
//! against, rather than direct calls to `SystemTime::now()` sprinkled
//! through the ratchet engine. Production code wires up `SystemClock`;
//! tests substitute `FixedClock` to exercise the skipped-key age-eviction
//! boundary deterministically.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time, as Unix seconds. Used for skipped-key
/// aging (§4.4) and signed pre-key rotation scheduling.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs()
    }
}

/// A clock that always returns a fixed value, advanced explicitly by
/// tests.
#[cfg(test)]
pub struct FixedClock(pub std::sync::atomic::AtomicU64);

#[cfg(test)]
impl FixedClock {
    pub fn new(initial: u64) -> Self {
        Self(std::sync::atomic::AtomicU64::new(initial))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
