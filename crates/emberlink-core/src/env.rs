//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness).
//! Production uses real system time and OS entropy; tests use a manual
//! clock and a seeded RNG so eviction sweeps, timeouts, and key generation
//! are reproducible.

use std::time::Duration;

use rand::{CryptoRng, RngCore};

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test environments
    /// may use a manually advanced clock of the same type.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls within one execution context must return times >=
    ///   previous calls.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time as milliseconds since the Unix epoch.
    ///
    /// Used for relay-assigned message timestamps and roster bookkeeping —
    /// ordering hints for UIs, never security decisions.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be
    /// used by runtime glue (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for connection ids and message-id suffixes.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Adapter exposing an [`Environment`] as a `rand` RNG.
///
/// The crypto layer takes `impl CryptoRng + RngCore` so its functions stay
/// pure; this bridges the environment's entropy source into that interface.
#[derive(Clone)]
pub struct EnvRng<E: Environment> {
    env: E,
}

impl<E: Environment> EnvRng<E> {
    /// Wrap an environment.
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

impl<E: Environment> RngCore for EnvRng<E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.env.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        self.env.random_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.env.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.env.random_bytes(dest);
        Ok(())
    }
}

// The Environment contract requires cryptographically secure entropy.
impl<E: Environment> CryptoRng for EnvRng<E> {}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Counter-based fake environment; predictable byte stream.
    #[derive(Clone)]
    struct CountingEnv {
        counter: Arc<Mutex<u8>>,
    }

    impl Environment for CountingEnv {
        type Instant = std::time::Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        #[allow(clippy::unwrap_used)]
        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut counter = self.counter.lock().unwrap();
            for byte in buffer {
                *byte = *counter;
                *counter = counter.wrapping_add(1);
            }
        }
    }

    #[test]
    fn env_rng_draws_from_environment() {
        let env = CountingEnv { counter: Arc::new(Mutex::new(0)) };
        let mut rng = EnvRng::new(env);

        let mut first = [0u8; 4];
        let mut second = [0u8; 4];
        rng.fill_bytes(&mut first);
        rng.fill_bytes(&mut second);

        assert_eq!(first, [0, 1, 2, 3]);
        assert_eq!(second, [4, 5, 6, 7]);
    }

    #[test]
    fn random_u64_consumes_eight_bytes() {
        let env = CountingEnv { counter: Arc::new(Mutex::new(0)) };

        let value = env.random_u64();
        assert_eq!(value, u64::from_be_bytes([0, 1, 2, 3, 4, 5, 6, 7]));
    }
}
