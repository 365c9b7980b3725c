use std::time::Duration;

/// Interval at which dispatchers recompute their target.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Interval at which fatal thresholds are checked and progress is logged.
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);

/// Time allowed for in-flight iterations to finish once a scenario stops issuing work.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Arrival-rate targets are expressed per this unit unless configured otherwise.
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

/// How long a fixed-concurrency worker waits for a pool slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name used when a scenario does not name its exec function.
pub const DEFAULT_EXEC: &str = "default";

/// Status codes counted as successful responses when a probe does not configure its own.
pub const DEFAULT_EXPECTED_STATUSES: std::ops::RangeInclusive<u16> = 200..=399;

/// Implicit tag every scenario carries, usable in threshold selectors.
pub const SCENARIO_TAG: &str = "scenario";
