//! Tracking session state and motion classification

use crate::sample::Sample;
use serde::Serialize;

/// Whether a sample moved away from its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Motion {
    Moving,
    Stationary,
}

/// State of one start..stop tracking run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingSession {
    pub identity: String,
    pub active: bool,
    pub last_sample: Option<Sample>,
    /// Length of the current run of samples within epsilon of each other;
    /// 0 while moving, 2 once the first repeat arrives
    pub stationary_streak: u32,
}

impl TrackingSession {
    /// An active session with no samples yet
    pub fn begin(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            active: true,
            last_sample: None,
            stationary_streak: 0,
        }
    }

    /// Classify `sample` against the previous one, advance the streak and
    /// make it the latest
    pub fn observe(&mut self, sample: Sample, epsilon: f64) -> Motion {
        let motion = match self.last_sample {
            Some(ref previous) if previous.coordinate().within_epsilon(&sample.coordinate(), epsilon) => {
                Motion::Stationary
            }
            _ => Motion::Moving,
        };

        self.stationary_streak = match motion {
            Motion::Stationary if self.stationary_streak == 0 => 2,
            Motion::Stationary => self.stationary_streak.saturating_add(1),
            Motion::Moving => 0,
        };
        self.last_sample = Some(sample);

        motion
    }

    /// Rebind to another identity; samples and streak carry over
    pub fn swap_identity(&mut self, identity: impl Into<String>) {
        self.identity = identity.into();
    }
}
