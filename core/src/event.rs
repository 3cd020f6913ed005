//! Run events: the audit trail of one pipeline run.
//!
//! Tasks return the events they produced; the engine appends them to the
//! run report in execution order.

use crate::types::RunId;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        as_of: DateTime<Utc>,
    },
    FeaturesExtracted {
        paid_loans: usize,
        days_since_late: usize,
        profit_rate_90d: usize,
        window_start: Option<NaiveDateTime>,
    },
    DecisionsComputed {
        clients: usize,
        accepted: usize,
        rejected: usize,
    },
    ArtifactWritten {
        path: String,
        rows: usize,
        bytes: u64,
    },
    ArtifactPublished {
        bucket: String,
        key: String,
        bytes: u64,
    },
    TaskRetried {
        task: String,
        attempt: u32,
        error: String,
    },
    RunCompleted {
        run_id: RunId,
    },
}

/// Everything a run emitted, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub events: Vec<PipelineEvent>,
}

impl RunReport {
    pub fn retries(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::TaskRetried { .. }))
            .count()
    }
}
