//! Single-writer progress record for one long-running operation.
//!
//! The emitter owns the [`OperationProgress`] and pushes a snapshot to the
//! caller's sink after every change. The sink is called synchronously and must
//! not block; no backpressure is applied.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::models::{OperationProgress, OperationStatus, OperationType};

/// Caller-supplied callback receiving every state change.
pub type ProgressSink = Arc<dyn Fn(&OperationProgress) + Send + Sync>;

/// A sink that drops everything.
pub fn noop_sink() -> ProgressSink {
    Arc::new(|_: &OperationProgress| {})
}

const RUNNING_START: u8 = 10;
const STEP_PER_LINE: u8 = 5;
/// Running operations never report more than this; only completion reaches 100.
const RUNNING_CAP: u8 = 90;

pub struct ProgressEmitter {
    state: OperationProgress,
    sink: ProgressSink,
}

impl ProgressEmitter {
    /// Create the record in `pending` and deliver it immediately.
    pub fn start(kind: OperationType, package: Option<String>, sink: ProgressSink) -> Self {
        let state = OperationProgress {
            id: new_operation_id(kind),
            kind,
            status: OperationStatus::Pending,
            package,
            progress: 0,
            message: format!("Preparing {kind}"),
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        let emitter = Self { state, sink };
        emitter.emit();
        emitter
    }

    pub fn running(&mut self, message: impl Into<String>) {
        self.state.status = OperationStatus::Running;
        self.state.progress = self.state.progress.max(RUNNING_START);
        self.state.message = message.into();
        self.emit();
    }

    /// Record one output line and nudge progress forward.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim().is_empty() {
            return;
        }
        self.state.progress = self
            .state
            .progress
            .saturating_add(STEP_PER_LINE)
            .min(RUNNING_CAP);
        self.state.message = line.clone();
        self.state.logs.push(line);
        self.emit();
    }

    pub fn complete(mut self, message: impl Into<String>) -> OperationProgress {
        self.state.status = OperationStatus::Completed;
        self.state.progress = 100;
        self.state.message = message.into();
        self.state.completed_at = Some(Utc::now());
        self.emit();
        self.state
    }

    /// Mark as failed. Progress keeps its last running value.
    pub fn fail(mut self, message: impl Into<String>) -> OperationProgress {
        self.state.status = OperationStatus::Failed;
        self.state.message = message.into();
        self.state.completed_at = Some(Utc::now());
        self.emit();
        self.state
    }

    pub fn logs(&self) -> &[String] {
        &self.state.logs
    }

    pub fn state(&self) -> &OperationProgress {
        &self.state
    }

    fn emit(&self) {
        (self.sink)(&self.state);
    }
}

fn new_operation_id(kind: OperationType) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{kind}-{}-{suffix:08x}", Utc::now().timestamp_millis())
}
