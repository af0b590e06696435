//! System clock and RNG adapters.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::infrastructure::ports::{ClockPort, RandomPort};

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl SystemRandom {
    pub fn new() -> Self {
        Self
    }
}

impl RandomPort for SystemRandom {
    fn gen_range(&self, min: i32, max: i32) -> i32 {
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Always returns the same value. Deterministic dice for tests and replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub i32);

impl RandomPort for FixedRandom {
    fn gen_range(&self, min: i32, max: i32) -> i32 {
        self.0.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_random_in_range() {
        let random = SystemRandom::new();
        for _ in 0..100 {
            let roll = random.gen_range(1, 8);
            assert!((1..=8).contains(&roll));
        }
    }

    #[test]
    fn test_fixed_random_clamped() {
        assert_eq!(FixedRandom(3).gen_range(1, 8), 3);
        assert_eq!(FixedRandom(99).gen_range(1, 8), 8);
    }
}
