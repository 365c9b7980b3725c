use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Fixed-period clock driving the dispatch loops.
pub(crate) struct Ticker {
    interval: Interval,
    period: Duration,
}

impl Ticker {
    pub async fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        interval.tick().await;
        Self { interval, period }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_period() {
        let started = tokio::time::Instant::now();
        let mut ticker = Ticker::new(Duration::from_millis(100)).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(ticker.to_string(), "100ms");
        for i in 1..=5 {
            ticker.tick().await;
            assert_eq!(started.elapsed(), Duration::from_millis(100 * i));
        }
    }
}
