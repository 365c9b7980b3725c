//! Ramp scheduling.
//!
//! A [`Ramp`] is an ordered list of [`Stage`]s. Within a stage the target moves linearly from the
//! previous stage's target (or the ramp's start value for the first stage) to the stage's own
//! target. Outside the ramp the value is clamped, never extrapolated.
use crate::InvalidRampError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One leg of a ramp: reach `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub target: f64,
    #[serde(with = "crate::duration")]
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: f64, duration: Duration) -> Self {
        Self { target, duration }
    }
}

/// The stage covering a point in time, with the values it interpolates between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub from: f64,
    pub to: f64,
}

impl Segment {
    pub fn is_flat(&self) -> bool {
        self.from == self.to
    }
}

/// A validated sequence of stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp {
    start: f64,
    stages: Vec<Stage>,
    total: Duration,
}

impl Ramp {
    /// Build a ramp. `start` defaults to the first stage's target.
    pub fn new(start: Option<f64>, stages: Vec<Stage>) -> Result<Self, InvalidRampError> {
        let total = validate(&stages)?;
        let start = match start {
            Some(start) if !(start.is_finite() && start >= 0.) => {
                return Err(InvalidRampError::InvalidStart(start))
            }
            Some(start) => start,
            None => stages[0].target,
        };

        Ok(Self {
            start,
            stages,
            total,
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest value the ramp ever reaches.
    pub fn peak(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start, f64::max)
    }

    /// Target at `elapsed` time into the ramp.
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        interpolate(self.start, &self.stages, elapsed)
    }

    /// The stage active at `elapsed`, or `None` once the ramp is over.
    pub fn segment_at(&self, elapsed: Duration) -> Option<Segment> {
        let mut stage_start = Duration::ZERO;
        let mut from = self.start;
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return Some(Segment {
                    index,
                    from,
                    to: stage.target,
                });
            }
            stage_start = stage_end;
            from = stage.target;
        }
        None
    }

    /// The same ramp cut off, or held at its last target, so that it lasts exactly `duration`.
    pub fn with_duration(&self, duration: Duration) -> Result<Ramp, InvalidRampError> {
        let mut stages = vec![];
        let mut elapsed = Duration::ZERO;
        for stage in &self.stages {
            let remaining = duration.saturating_sub(elapsed);
            if remaining.is_zero() {
                break;
            }
            if stage.duration <= remaining {
                stages.push(*stage);
                elapsed += stage.duration;
            } else {
                let cut = Stage::new(self.value_at(elapsed + remaining), remaining);
                stages.push(cut);
                elapsed = duration;
            }
        }

        let last = stages.last().map(|s| s.target).unwrap_or(self.start);
        if elapsed < duration {
            stages.push(Stage::new(last, duration - elapsed));
        }
        Ramp::new(Some(self.start), stages)
    }
}

/// Target at `elapsed` for a raw list of stages, starting from the first stage's target.
///
/// ```
/// use barrage_core::{rate_at, Stage};
/// use std::time::Duration;
///
/// let stages = [
///     Stage::new(10., Duration::from_secs(10)),
///     Stage::new(20., Duration::from_secs(10)),
/// ];
/// assert_eq!(rate_at(&stages, Duration::from_secs(15)).unwrap(), 15.);
/// assert_eq!(rate_at(&stages, Duration::from_secs(60)).unwrap(), 20.);
/// ```
pub fn rate_at(stages: &[Stage], elapsed: Duration) -> Result<f64, InvalidRampError> {
    validate(stages)?;
    Ok(interpolate(stages[0].target, stages, elapsed))
}

fn validate(stages: &[Stage]) -> Result<Duration, InvalidRampError> {
    if stages.is_empty() {
        return Err(InvalidRampError::Empty);
    }

    let mut total = Duration::ZERO;
    for (index, stage) in stages.iter().enumerate() {
        if stage.duration.is_zero() {
            return Err(InvalidRampError::NonPositiveDuration { index });
        }
        if !(stage.target.is_finite() && stage.target >= 0.) {
            return Err(InvalidRampError::InvalidTarget {
                index,
                target: stage.target,
            });
        }
        total += stage.duration;
    }
    Ok(total)
}

// NOTE: Stages are half-open, [start, end). A timestamp on a boundary therefore lands at fraction
// zero of the next stage and yields the previous target exactly, with no float rounding.
fn interpolate(start: f64, stages: &[Stage], elapsed: Duration) -> f64 {
    let mut stage_start = Duration::ZERO;
    let mut from = start;
    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let into = (elapsed - stage_start).as_secs_f64();
            let fraction = into / stage.duration.as_secs_f64();
            return from + (stage.target - from) * fraction;
        }
        stage_start = stage_end;
        from = stage.target;
    }
    from
}
