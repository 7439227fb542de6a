//! Runs narration synthesis and image acquisition side by side.
//!
//! Both jobs are spawned onto the runtime's worker threads. The run succeeds
//! only if both succeed; the first failure broadcasts cancellation to the
//! other job, stops awaiting it and is returned to the caller.

use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Narration,
    Images,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Narration => "narration",
            TaskKind::Images => "images",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled)
    }
}

/// Tracks one job's lifecycle. Terminal states are final.
#[derive(Debug)]
pub struct GenerationTask {
    kind: TaskKind,
    state: TaskState,
}

impl GenerationTask {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Returns false, leaving the state alone, for transitions the lifecycle
    /// does not allow.
    pub fn transition(&mut self, next: TaskState) -> bool {
        let allowed = matches!(
            (self.state, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Succeeded)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Running, TaskState::Cancelled)
        );
        if allowed {
            debug!("{} task: {:?} -> {:?}", self.kind.label(), self.state, next);
            self.state = next;
        }
        allowed
    }
}

/// Cooperative cancellation handed to each job. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    #[cfg(test)]
    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested or the orchestrator is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct GenerationOrchestrator;

impl GenerationOrchestrator {
    pub async fn run<N, NF, NT, I, IF, IT>(narration_job: N, image_job: I) -> Result<(NT, IT)>
    where
        N: FnOnce(CancelSignal) -> NF,
        NF: Future<Output = Result<NT>> + Send + 'static,
        NT: Send + 'static,
        I: FnOnce(CancelSignal) -> IF,
        IF: Future<Output = Result<IT>> + Send + 'static,
        IT: Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut narration = GenerationTask::new(TaskKind::Narration);
        let mut images = GenerationTask::new(TaskKind::Images);

        let mut narration_handle = tokio::spawn(narration_job(CancelSignal {
            rx: cancel_rx.clone(),
        }));
        narration.transition(TaskState::Running);
        let mut images_handle = tokio::spawn(image_job(CancelSignal { rx: cancel_rx }));
        images.transition(TaskState::Running);
        info!("Narration and image tasks started");

        let mut narration_out = None;
        let mut images_out = None;

        loop {
            let (finished, outcome) = tokio::select! {
                res = &mut narration_handle, if narration_out.is_none() => {
                    (TaskKind::Narration, join_outcome(TaskKind::Narration, res).map(|v| narration_out = Some(v)))
                }
                res = &mut images_handle, if images_out.is_none() => {
                    (TaskKind::Images, join_outcome(TaskKind::Images, res).map(|v| images_out = Some(v)))
                }
            };

            let (task, sibling) = match finished {
                TaskKind::Narration => (&mut narration, &mut images),
                TaskKind::Images => (&mut images, &mut narration),
            };
            match outcome {
                Ok(()) => {
                    task.transition(TaskState::Succeeded);
                    info!("{} task succeeded", finished.label());
                }
                Err(e) => {
                    task.transition(TaskState::Failed);
                    error!("{} task failed: {}", finished.label(), e);
                    if !sibling.state().is_terminal() {
                        let _ = cancel_tx.send(true);
                        sibling.transition(TaskState::Cancelled);
                        info!("Requested cancellation of {} task", sibling.kind.label());
                    }
                    // Dropping the remaining handle detaches it; whatever it
                    // eventually produces is discarded.
                    return Err(e);
                }
            }

            match (narration_out.take(), images_out.take()) {
                (Some(n), Some(i)) => return Ok((n, i)),
                (n, i) => {
                    narration_out = n;
                    images_out = i;
                }
            }
        }
    }
}

fn join_outcome<T>(
    kind: TaskKind,
    res: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Err(PipelineError::Cancelled(kind.label())),
        Err(e) => Err(PipelineError::Panicked(kind.label(), e.to_string())),
    }
}
