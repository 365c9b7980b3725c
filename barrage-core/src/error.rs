use thiserror::Error;

/// A ramp that cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRampError {
    #[error("ramp has no stages")]
    Empty,

    #[error("stage {index} has a non-positive duration")]
    NonPositiveDuration { index: usize },

    #[error("stage {index} has an invalid target ({target}); targets must be finite and >= 0")]
    InvalidTarget { index: usize, target: f64 },

    #[error("ramp start value {0} is invalid; it must be finite and >= 0")]
    InvalidStart(f64),
}

/// Configuration-time failures. These are the only errors that abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no scenarios configured")]
    NoScenarios,

    #[error("scenario \"{scenario}\": {source}")]
    InvalidRamp {
        scenario: String,
        #[source]
        source: InvalidRampError,
    },

    #[error("scenario \"{scenario}\" needs {peak} workers at peak but only {preallocated} are preallocated")]
    InsufficientWorkers {
        scenario: String,
        preallocated: usize,
        peak: usize,
    },

    #[error("scenario \"{scenario}\" issues work but has no preallocated workers")]
    NoWorkers { scenario: String },

    #[error("scenario \"{scenario}\" references unknown exec \"{exec}\"")]
    UnknownExec { scenario: String, exec: String },

    #[error("scenario \"{scenario}\": pause only applies to fixed-concurrency scenarios; put think time on the exec instead")]
    PauseOnArrivalRate { scenario: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("invalid threshold metric key \"{key}\": {reason}")]
    InvalidMetricKey { key: String, reason: String },

    #[error("invalid threshold \"{expression}\" on {key}: {reason}")]
    InvalidThreshold {
        key: String,
        expression: String,
        reason: String,
    },

    #[error("exec \"{exec}\": {reason}")]
    InvalidProbe { exec: String, reason: String },
}
