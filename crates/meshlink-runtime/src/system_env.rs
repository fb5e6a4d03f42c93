//! Production Environment implementation using system time and RNG.
//!
//! This module provides `SystemEnv`, the production implementation of the
//! `Environment` trait that uses real system time and OS randomness.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use meshlink_core::Environment;

/// Production environment using system clocks and OS entropy.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for deadlines
/// - Uses `SystemTime` for transaction id seeds
/// - Uses `getrandom` for call ids
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Call ids only need to be unique per client, not secret.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn wall_clock_looks_like_epoch_millis() {
        let env = SystemEnv::new();

        // 2020-01-01T00:00:00Z
        assert!(env.wall_clock_millis() > 1_577_836_800_000);
    }

    #[test]
    fn random_call_ids_differ() {
        let env = SystemEnv::new();

        assert_ne!(env.random_u64(), env.random_u64());
    }
}
