use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// A single outbound request, recorded through the transaction hook.
    Request,
    /// One execution of a scenario's exec function, or an arrival that never ran.
    Iteration,
}

/// Why a sample counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorTag {
    HttpStatus(u16),
    Transport,
    Timeout,
    Exec,
    Panic,
    DroppedArrival,
    PoolExhausted,
    Interrupted,
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorTag::HttpStatus(code) => write!(f, "http_status_{code}"),
            ErrorTag::Transport => f.write_str("transport"),
            ErrorTag::Timeout => f.write_str("timeout"),
            ErrorTag::Exec => f.write_str("exec"),
            ErrorTag::Panic => f.write_str("panic"),
            ErrorTag::DroppedArrival => f.write_str("dropped_arrival"),
            ErrorTag::PoolExhausted => f.write_str("pool_exhausted"),
            ErrorTag::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success { status: Option<u16> },
    Failure(ErrorTag),
}

impl Outcome {
    pub const OK: Outcome = Outcome::Success { status: None };

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Arrivals that never reached a worker carry no latency.
    pub fn never_ran(&self) -> bool {
        matches!(
            self,
            Outcome::Failure(ErrorTag::DroppedArrival | ErrorTag::PoolExhausted)
        )
    }
}

/// One observation. Immutable; handed to the collector by value.
#[derive(Debug, Clone)]
pub struct Sample {
    scenario: Arc<str>,
    kind: SampleKind,
    timestamp: Duration,
    latency: Duration,
    outcome: Outcome,
}

impl Sample {
    pub fn new(
        scenario: Arc<str>,
        kind: SampleKind,
        timestamp: Duration,
        latency: Duration,
        outcome: Outcome,
    ) -> Self {
        Self {
            scenario,
            kind,
            timestamp,
            latency,
            outcome,
        }
    }

    pub fn request(
        scenario: Arc<str>,
        timestamp: Duration,
        latency: Duration,
        outcome: Outcome,
    ) -> Self {
        Self::new(scenario, SampleKind::Request, timestamp, latency, outcome)
    }

    pub fn iteration(
        scenario: Arc<str>,
        timestamp: Duration,
        latency: Duration,
        outcome: Outcome,
    ) -> Self {
        Self::new(scenario, SampleKind::Iteration, timestamp, latency, outcome)
    }

    pub fn dropped(scenario: Arc<str>, timestamp: Duration, tag: ErrorTag) -> Self {
        Self::new(
            scenario,
            SampleKind::Iteration,
            timestamp,
            Duration::ZERO,
            Outcome::Failure(tag),
        )
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    /// Time since the start of the run at which the sample completed.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}
