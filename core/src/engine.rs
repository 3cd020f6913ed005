//! The pipeline engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. transform_features     : extract, merge/decide, write Parquet
//!   2. upload_to_object_store : publish the Parquet file
//!
//! RULES:
//!   - Tasks execute in registration order; a task starts only after the
//!     previous one completed successfully.
//!   - A task that exhausts its retries stops the run. Nothing after it runs,
//!     so a failed transform never publishes.
//!   - Retries apply to the whole task and ignore the error kind.
//!   - One run uses one RunClock for every attempt of every task.

use crate::{
    artifact::ArtifactWriter,
    clock::RunClock,
    config::{PipelineConfig, RetryPolicy},
    error::{PipelineError, PipelineResult},
    event::{PipelineEvent, RunReport},
    publisher::{object_store_for, ArtifactPublisher},
    store::provider_for,
    task::{PipelineTask, TransformTask, UploadTask},
};
use std::time::Duration;

pub struct PipelineEngine {
    pub clock:  RunClock,
    retry:      RetryPolicy,
    tasks:      Vec<Box<dyn PipelineTask>>,
}

impl PipelineEngine {
    pub fn new(clock: RunClock, retry: RetryPolicy) -> Self {
        Self {
            clock,
            retry,
            tasks: Vec::new(),
        }
    }

    /// Build a fully wired engine: transform then upload.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: &PipelineConfig, clock: RunClock) -> PipelineResult<Self> {
        let mut engine = PipelineEngine::new(clock, config.retry);
        engine.register(Box::new(transform_task(config)));
        engine.register(Box::new(upload_task(config)?));
        Ok(engine)
    }

    /// Register a task. Call in the documented execution order.
    pub fn register(&mut self, task: Box<dyn PipelineTask>) {
        self.tasks.push(task);
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run every registered task once, in order, with the retry policy.
    pub fn run(&mut self) -> PipelineResult<RunReport> {
        let mut report = RunReport {
            run_id: self.clock.run_id.clone(),
            events: vec![PipelineEvent::RunStarted {
                run_id: self.clock.run_id.clone(),
                as_of: self.clock.as_of,
            }],
        };
        log::info!("Run {} started (as_of {})", self.clock.run_id, self.clock.as_of);

        for task in &mut self.tasks {
            run_with_retry(task.as_mut(), &self.clock, self.retry, &mut report.events)?;
        }

        report.events.push(PipelineEvent::RunCompleted {
            run_id: self.clock.run_id.clone(),
        });
        log::info!("Run {} completed", self.clock.run_id);
        Ok(report)
    }
}

/// The transform task wired from configuration.
pub fn transform_task(config: &PipelineConfig) -> TransformTask {
    TransformTask::new(
        provider_for(&config.source),
        ArtifactWriter::new(config.output_dir.clone()),
    )
}

/// The upload task wired from configuration.
pub fn upload_task(config: &PipelineConfig) -> PipelineResult<UploadTask> {
    let store = object_store_for(&config.object_store)?;
    let publisher = ArtifactPublisher::new(store, config.object_store.bucket());
    let artifact = ArtifactWriter::new(config.output_dir.clone()).artifact_path();
    Ok(UploadTask::new(publisher, artifact))
}

fn run_with_retry(
    task: &mut dyn PipelineTask,
    clock: &RunClock,
    policy: RetryPolicy,
    events: &mut Vec<PipelineEvent>,
) -> PipelineResult<()> {
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        log::info!("Task '{}' attempt {attempt}/{max_attempts}", task.name());
        match task.run(clock) {
            Ok(task_events) => {
                events.extend(task_events);
                return Ok(());
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.retry_delay();
                log::warn!(
                    "Task '{}' attempt {attempt} failed: {e}; retrying in {}s",
                    task.name(),
                    delay.as_secs()
                );
                events.push(PipelineEvent::TaskRetried {
                    task: task.name().to_string(),
                    attempt,
                    error: e.to_string(),
                });
                pause(delay);
                attempt += 1;
            }
            Err(e) => {
                log::error!("Task '{}' failed after {attempt} attempt(s): {e}", task.name());
                return Err(PipelineError::TaskFailed {
                    task: task.name(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
