//! Run clock: the identity and reference instant of one pipeline run.

use crate::types::RunId;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunClock {
    pub run_id:   RunId,
    /// Captured once when the run starts. Every "elapsed since" feature is
    /// measured against this instant so all attempts of a run agree.
    pub as_of:    DateTime<Utc>,
}

impl RunClock {
    /// Start a new run at the current wall-clock instant.
    pub fn start() -> Self {
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            as_of: Utc::now(),
        }
    }

    /// A run pinned to a known instant (tests, backfills).
    pub fn fixed(run_id: impl Into<RunId>, as_of: DateTime<Utc>) -> Self {
        Self { run_id: run_id.into(), as_of }
    }

    /// Fractional days from `then` to `as_of`, never negative.
    pub fn days_since(&self, then: NaiveDateTime) -> f64 {
        let elapsed = self.as_of.naive_utc() - then;
        (elapsed.num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
    }
}

const MILLIS_PER_DAY: f64 = 86_400_000.0;
