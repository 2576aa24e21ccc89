use rand::Rng;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Draws an election timeout uniformly from `[min_ms, max_ms]`.
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(lo..=hi))
}

/// Per-node source of election timeouts. Every call draws independently so
/// that nodes which collided once are unlikely to collide again.
#[derive(Debug, Clone, Copy)]
pub struct ElectionTimer {
    min_ms: u64,
    max_ms: u64,
}

impl ElectionTimer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn next_timeout(&self) -> Duration {
        random_election_timeout(self.min_ms, self.max_ms)
    }
}

/// Leader heartbeat ticker. The first tick completes immediately.
pub fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn timeouts_stay_within_range() {
        let timer = ElectionTimer::new(150, 300);
        for _ in 0..1000 {
            let t = timer.next_timeout();
            assert!(t >= Duration::from_millis(150));
            assert!(t <= Duration::from_millis(300));
        }
    }

    #[test]
    fn timeouts_are_randomized() {
        let timer = ElectionTimer::new(150, 300);
        let distinct: HashSet<Duration> = (0..200).map(|_| timer.next_timeout()).collect();
        assert!(distinct.len() > 10, "only {} distinct timeouts", distinct.len());
    }

    #[test]
    fn degenerate_and_inverted_ranges_are_accepted() {
        assert_eq!(random_election_timeout(200, 200), Duration::from_millis(200));

        let t = random_election_timeout(300, 150);
        assert!(t >= Duration::from_millis(150) && t <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticker_fires_immediately_then_periodically() {
        let mut ticker = heartbeat_ticker(Duration::from_millis(50));
        let start = tokio::time::Instant::now();

        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }
}
