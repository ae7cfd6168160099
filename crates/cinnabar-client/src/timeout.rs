//! Tick-driven timers with exponential backoff and random jitter.

use rand::Rng;

/// Exponent cap for backoff doubling. Beyond this, retransmission intervals
/// stop growing; unbounded retries continue at the capped interval.
const BACKOFF_ATTEMPTS_MAX: u8 = 8;

/// A timer advanced by the host's fixed-rate tick.
///
/// A timeout is either ticking or stopped. While ticking, every
/// [`Timeout::tick`] advances it toward its deadline; [`Timeout::fired`]
/// reports arrival. [`Timeout::backoff`] re-arms it after a miss with an
/// exponentially longer deadline plus random jitter, so retransmissions from
/// many clients do not synchronize.
#[derive(Debug, Clone)]
pub struct Timeout {
    name: &'static str,

    /// The base deadline in ticks.
    after: u64,

    /// The current deadline: `after` until the first backoff.
    duration: u64,

    attempts: u8,
    ticks: u64,
    ticking: bool,
}

impl Timeout {
    /// Creates a stopped timeout with a base deadline of `after` ticks.
    ///
    /// # Panics
    ///
    /// Panics if `after` is zero.
    pub fn new(name: &'static str, after: u64) -> Self {
        assert!(after > 0, "timeout {name:?} must have a non-zero deadline");
        Self {
            name,
            after,
            duration: after,
            attempts: 0,
            ticks: 0,
            ticking: false,
        }
    }

    /// Starts the timer from zero with the base deadline.
    pub fn start(&mut self) {
        self.attempts = 0;
        self.duration = self.after;
        self.ticks = 0;
        self.ticking = true;
    }

    /// Stops the timer.
    pub fn stop(&mut self) {
        self.ticking = false;
    }

    /// Rewinds a ticking timer to zero, keeping the current deadline.
    ///
    /// # Panics
    ///
    /// Panics if the timer is stopped.
    pub fn reset(&mut self) {
        assert!(self.ticking, "cannot reset stopped timeout {:?}", self.name);
        self.ticks = 0;
    }

    /// Advances the timer by one tick, if ticking.
    pub fn tick(&mut self) {
        if self.ticking {
            self.ticks += 1;
        }
    }

    /// Returns true once a ticking timer reaches its deadline.
    pub fn fired(&self) -> bool {
        self.ticking && self.ticks >= self.duration
    }

    /// Re-arms after a miss: doubles the deadline per attempt (capped) and
    /// adds jitter of up to one base deadline.
    ///
    /// # Panics
    ///
    /// Panics if the timer is stopped.
    pub fn backoff(&mut self, rng: &mut impl Rng) {
        assert!(self.ticking, "cannot back off stopped timeout {:?}", self.name);
        self.ticks = 0;
        self.attempts = self.attempts.saturating_add(1);

        let exponent = u32::from(self.attempts.min(BACKOFF_ATTEMPTS_MAX));
        let backoff = self.after.saturating_mul(1u64 << exponent);
        let jitter = rng.gen_range(0..=self.after);
        self.duration = backoff.saturating_add(jitter);

        tracing::trace!(
            timeout = self.name,
            attempts = self.attempts,
            duration = self.duration,
            "timeout backoff"
        );
    }

    /// Returns the number of misses since the last start.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn tick_n(timeout: &mut Timeout, n: u64) {
        for _ in 0..n {
            timeout.tick();
        }
    }

    #[test]
    fn fires_at_the_base_deadline() {
        let mut timeout = Timeout::new("request", 3);
        timeout.start();

        tick_n(&mut timeout, 2);
        assert!(!timeout.fired());
        timeout.tick();
        assert!(timeout.fired());
    }

    #[test]
    fn stopped_timer_never_fires() {
        let mut timeout = Timeout::new("request", 1);
        tick_n(&mut timeout, 10);
        assert!(!timeout.fired());

        timeout.start();
        timeout.tick();
        assert!(timeout.fired());
        timeout.stop();
        assert!(!timeout.fired());
    }

    #[test]
    fn reset_rewinds_without_touching_attempts() {
        let mut timeout = Timeout::new("ping", 2);
        timeout.start();
        tick_n(&mut timeout, 2);
        assert!(timeout.fired());

        timeout.reset();
        assert!(!timeout.fired());
        assert_eq!(timeout.attempts(), 0);
    }

    #[test]
    fn backoff_grows_the_deadline() {
        let mut timeout = Timeout::new("request", 4);
        timeout.start();
        let mut rng = rng();

        timeout.backoff(&mut rng);
        assert_eq!(timeout.attempts(), 1);
        // One attempt: deadline in [2 * after, 2 * after + after].
        assert!(timeout.duration >= 8 && timeout.duration <= 12);

        timeout.backoff(&mut rng);
        assert!(timeout.duration >= 16 && timeout.duration <= 20);
    }

    #[test]
    fn backoff_caps_the_exponent() {
        let mut timeout = Timeout::new("request", 2);
        timeout.start();
        let mut rng = rng();

        for _ in 0..100 {
            timeout.backoff(&mut rng);
        }
        // Capped: 2 * 2^8 plus at most one base deadline of jitter.
        assert!(timeout.duration <= 2 * 256 + 2);
    }

    #[test]
    fn start_clears_backoff_state() {
        let mut timeout = Timeout::new("request", 2);
        timeout.start();
        let mut rng = rng();
        timeout.backoff(&mut rng);
        timeout.backoff(&mut rng);

        timeout.start();
        assert_eq!(timeout.attempts(), 0);
        tick_n(&mut timeout, 2);
        assert!(timeout.fired());
    }

    #[test]
    fn same_seed_gives_same_schedule() {
        let mut a = Timeout::new("request", 5);
        let mut b = Timeout::new("request", 5);
        a.start();
        b.start();
        let mut rng_a = rng();
        let mut rng_b = rng();

        for _ in 0..10 {
            a.backoff(&mut rng_a);
            b.backoff(&mut rng_b);
            assert_eq!(a.duration, b.duration);
        }
    }
}
