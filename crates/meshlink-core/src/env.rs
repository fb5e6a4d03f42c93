//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples client logic from system resources
//! (clocks and randomness). This enables:
//!
//! - Deterministic simulation: the harness drives a virtual clock and a seeded
//!   RNG, so timeout races replay identically.
//!
//! - Production runtime: the tokio driver uses the system clock and OS entropy
//!   without any change to the protocol logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Instant;

/// Abstract environment providing time and randomness.
///
/// Protocol logic never waits: drivers own their timers and feed the clock
/// back in as `ClientEvent::Tick`.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time. All deadlines are measured on this
    /// clock.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch.
    ///
    /// Only used to seed RPC transaction ids, which devices expect to look
    /// like millisecond timestamps. May jump; never used for deadlines.
    fn wall_clock_millis(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism during simulations: Given the same RNG seed, this produces
    ///   the same sequence of bytes
    /// - Unpredictability in production: Uses OS entropy
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for identifiers the client allocates itself, such as outbound call
    /// ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
