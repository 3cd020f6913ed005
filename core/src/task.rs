//! Task trait and the two pipeline tasks.
//!
//! RULE: Every pipeline stage implements PipelineTask.
//! The engine calls run() on each registered task in registration order.
//! A task either completes fully or returns an error; there is no partial
//! success for a task.

use crate::{
    artifact::ArtifactWriter,
    clock::RunClock,
    decision::{merge_features, DecisionSummary},
    error::PipelineResult,
    event::PipelineEvent,
    extractor::extract_features,
    publisher::ArtifactPublisher,
    store::ConnectionProvider,
};
use std::path::PathBuf;

/// The contract every task must fulfill.
pub trait PipelineTask {
    /// Unique stable name for this task.
    fn name(&self) -> &'static str;

    /// Run one attempt. May be called again after a failure, so an attempt
    /// must not depend on state left by a previous one.
    fn run(&mut self, clock: &RunClock) -> PipelineResult<Vec<PipelineEvent>>;
}

// ── Transform ────────────────────────────────────────────────────────────────

/// Extract → merge/decide → write.
pub struct TransformTask {
    provider: Box<dyn ConnectionProvider>,
    writer: ArtifactWriter,
}

impl TransformTask {
    pub const NAME: &'static str = "transform_features";

    pub fn new(provider: Box<dyn ConnectionProvider>, writer: ArtifactWriter) -> Self {
        Self { provider, writer }
    }
}

impl PipelineTask for TransformTask {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, clock: &RunClock) -> PipelineResult<Vec<PipelineEvent>> {
        // Fresh connection per attempt; dropped when the attempt ends.
        let mut source = self.provider.connect()?;
        let features = extract_features(source.as_mut(), clock)?;
        drop(source);

        let rows = merge_features(&features)?;
        let summary = DecisionSummary::of(&rows);
        let written = self.writer.write(&rows, &clock.run_id)?;

        Ok(vec![
            PipelineEvent::FeaturesExtracted {
                paid_loans: features.paid_loans.len(),
                days_since_late: features.days_since_late.len(),
                profit_rate_90d: features.profit_rate_90d.len(),
                window_start: features.window_start,
            },
            PipelineEvent::DecisionsComputed {
                clients: summary.clients,
                accepted: summary.accepted,
                rejected: summary.rejected,
            },
            PipelineEvent::ArtifactWritten {
                path: written.path.display().to_string(),
                rows: written.rows,
                bytes: written.bytes,
            },
        ])
    }
}

// ── Upload ───────────────────────────────────────────────────────────────────

/// Publish the artifact the transform task wrote.
pub struct UploadTask {
    publisher: ArtifactPublisher,
    artifact: PathBuf,
}

impl UploadTask {
    pub const NAME: &'static str = "upload_to_object_store";

    pub fn new(publisher: ArtifactPublisher, artifact: PathBuf) -> Self {
        Self { publisher, artifact }
    }
}

impl PipelineTask for UploadTask {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, _clock: &RunClock) -> PipelineResult<Vec<PipelineEvent>> {
        let published = self.publisher.publish(&self.artifact)?;
        Ok(vec![PipelineEvent::ArtifactPublished {
            bucket: published.bucket,
            key: published.key,
            bytes: published.bytes,
        }])
    }
}
