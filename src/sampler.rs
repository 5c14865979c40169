// SAMPLING SCHEDULE
// FIXED:  SAMPLE k AT start + k*P (k = 0 FIRES IMMEDIATELY)
// RANDOM: SAMPLE k AT start + k*P + U[0, P). ONE SAMPLE PER PERIOD, SO THE
//         AVERAGE RATE MATCHES FIXED MODE WHILE THE PHASE IS RANDOM.
// A LATE TICK SKIPS THE MISSED PERIODS INSTEAD OF FIRING A BURST.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SampleClock {
    start: Instant,
    period: Duration,
    rng: Option<StdRng>,
    index: u64,
    next: Instant,
}

impl SampleClock {
    pub fn new(start: Instant, period: Duration, random: bool) -> Self {
        let rng = random.then(StdRng::from_entropy);
        Self::with_rng(start, period, rng)
    }

    pub fn seeded(start: Instant, period: Duration, seed: u64) -> Self {
        Self::with_rng(start, period, Some(StdRng::seed_from_u64(seed)))
    }

    fn with_rng(start: Instant, period: Duration, rng: Option<StdRng>) -> Self {
        let mut clock = Self {
            start,
            period,
            rng,
            index: 0,
            next: start,
        };
        clock.next = clock.deadline_for(0);
        clock
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    // RE-ARM AFTER A TICK AT now: THE FIRST PERIOD STARTING AFTER now
    pub fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let period = self.period.as_nanos().max(1);
        let current = (elapsed / period) as u64;
        self.index = (current + 1).max(self.index + 1);
        self.next = self.deadline_for(self.index);
    }

    fn deadline_for(&mut self, index: u64) -> Instant {
        let nanos = self.period.as_nanos().max(1) as u64;
        let base = self.start + Duration::from_nanos(nanos.saturating_mul(index));
        match &mut self.rng {
            Some(rng) => base + Duration::from_nanos(rng.gen_range(0..nanos)),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: Duration = Duration::from_millis(100);

    #[test]
    fn fixed_fires_immediately_then_on_period() {
        let t0 = Instant::now();
        let mut c = SampleClock::new(t0, P, false);
        assert_eq!(c.deadline(), t0);
        c.advance(t0);
        assert_eq!(c.deadline(), t0 + P);
        c.advance(t0 + P + Duration::from_millis(3));
        assert_eq!(c.deadline(), t0 + 2 * P);
    }

    #[test]
    fn fixed_skips_missed_periods() {
        let t0 = Instant::now();
        let mut c = SampleClock::new(t0, P, false);
        c.advance(t0 + Duration::from_millis(450));
        assert_eq!(c.deadline(), t0 + 5 * P);
    }

    #[test]
    fn random_stays_inside_its_period() {
        let t0 = Instant::now();
        let mut c = SampleClock::seeded(t0, P, 7);
        for k in 0..50u32 {
            let d = c.deadline();
            assert!(d >= t0 + P * k, "sample {} too early", k);
            assert!(d < t0 + P * (k + 1), "sample {} too late", k);
            c.advance(d);
        }
    }
}
