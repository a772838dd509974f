// src/events.rs

//! Lifecycle events and listeners.
//!
//! Every event carries an explicit symbolic tag (`SchedulerEvent::tag`, also
//! used as the serde tag), so adding a variant never shifts the identity of
//! existing ones.
//!
//! Events for one job are delivered in the order the mutations happened:
//! the scheduler hands them to listeners while it still holds that job's
//! lock.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::TaskState;
use crate::ids::{JobId, TaskId};
use crate::job::JobStatus;
use crate::types::JobPriority;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    JobSubmitted { job: JobId },
    JobPendingToRunning { job: JobId },
    JobRunningToStalled { job: JobId },
    JobStalledToRunning { job: JobId },
    JobPaused { job: JobId },
    /// `status` is where the job went back to.
    JobResumed { job: JobId, status: JobStatus },
    JobFinished { job: JobId },
    JobCancelled { job: JobId, cause: Option<TaskId> },
    JobFailed { job: JobId, cause: Option<TaskId> },
    JobKilled { job: JobId },
    JobRemoved { job: JobId },
    JobPriorityChanged { job: JobId, priority: JobPriority },
    JobNeedsInspection { job: JobId, reason: String },
    TaskPendingToRunning { task: TaskId },
    TaskRunningToFinished { task: TaskId, state: TaskState },
    TaskWaitingForRestart { task: TaskId, attempts: u32 },
    TaskInError { task: TaskId, message: String },
    TaskReplicated { initiator: TaskId, created: Vec<TaskId> },
    TaskSkipped { initiator: TaskId, skipped: Vec<TaskId> },
    TaskFlowError { task: TaskId, reason: String },
}

impl SchedulerEvent {
    /// Stable symbolic name of the event type.
    pub fn tag(&self) -> &'static str {
        match self {
            SchedulerEvent::JobSubmitted { .. } => "job_submitted",
            SchedulerEvent::JobPendingToRunning { .. } => "job_pending_to_running",
            SchedulerEvent::JobRunningToStalled { .. } => "job_running_to_stalled",
            SchedulerEvent::JobStalledToRunning { .. } => "job_stalled_to_running",
            SchedulerEvent::JobPaused { .. } => "job_paused",
            SchedulerEvent::JobResumed { .. } => "job_resumed",
            SchedulerEvent::JobFinished { .. } => "job_finished",
            SchedulerEvent::JobCancelled { .. } => "job_cancelled",
            SchedulerEvent::JobFailed { .. } => "job_failed",
            SchedulerEvent::JobKilled { .. } => "job_killed",
            SchedulerEvent::JobRemoved { .. } => "job_removed",
            SchedulerEvent::JobPriorityChanged { .. } => "job_priority_changed",
            SchedulerEvent::JobNeedsInspection { .. } => "job_needs_inspection",
            SchedulerEvent::TaskPendingToRunning { .. } => "task_pending_to_running",
            SchedulerEvent::TaskRunningToFinished { .. } => "task_running_to_finished",
            SchedulerEvent::TaskWaitingForRestart { .. } => "task_waiting_for_restart",
            SchedulerEvent::TaskInError { .. } => "task_in_error",
            SchedulerEvent::TaskReplicated { .. } => "task_replicated",
            SchedulerEvent::TaskSkipped { .. } => "task_skipped",
            SchedulerEvent::TaskFlowError { .. } => "task_flow_error",
        }
    }

    /// Job the event belongs to.
    pub fn job(&self) -> &JobId {
        match self {
            SchedulerEvent::JobSubmitted { job }
            | SchedulerEvent::JobPendingToRunning { job }
            | SchedulerEvent::JobRunningToStalled { job }
            | SchedulerEvent::JobStalledToRunning { job }
            | SchedulerEvent::JobPaused { job }
            | SchedulerEvent::JobResumed { job, .. }
            | SchedulerEvent::JobFinished { job }
            | SchedulerEvent::JobCancelled { job, .. }
            | SchedulerEvent::JobFailed { job, .. }
            | SchedulerEvent::JobKilled { job }
            | SchedulerEvent::JobRemoved { job }
            | SchedulerEvent::JobPriorityChanged { job, .. }
            | SchedulerEvent::JobNeedsInspection { job, .. } => job,
            SchedulerEvent::TaskPendingToRunning { task }
            | SchedulerEvent::TaskRunningToFinished { task, .. }
            | SchedulerEvent::TaskWaitingForRestart { task, .. }
            | SchedulerEvent::TaskInError { task, .. }
            | SchedulerEvent::TaskFlowError { task, .. } => task.job(),
            SchedulerEvent::TaskReplicated { initiator, .. }
            | SchedulerEvent::TaskSkipped { initiator, .. } => initiator.job(),
        }
    }

    /// Job status this event moves the job into, if any.
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            SchedulerEvent::JobSubmitted { .. } => Some(JobStatus::Pending),
            SchedulerEvent::JobPendingToRunning { .. }
            | SchedulerEvent::JobStalledToRunning { .. } => Some(JobStatus::Running),
            SchedulerEvent::JobRunningToStalled { .. } => Some(JobStatus::Stalled),
            SchedulerEvent::JobPaused { .. } => Some(JobStatus::Paused),
            SchedulerEvent::JobResumed { status, .. } => Some(*status),
            SchedulerEvent::JobFinished { .. } => Some(JobStatus::Finished),
            SchedulerEvent::JobCancelled { .. } => Some(JobStatus::Cancelled),
            SchedulerEvent::JobFailed { .. } => Some(JobStatus::Failed),
            SchedulerEvent::JobKilled { .. } => Some(JobStatus::Killed),
            _ => None,
        }
    }
}

/// Receives lifecycle events.
///
/// Called while the emitting job is locked: implementations must not call
/// back into the scheduler for the same job.
pub trait SchedulerListener: Send + Sync {
    fn on_event(&self, event: &SchedulerEvent);
}

/// Zero or more registered listeners.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn SchedulerListener>) {
        match self.listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn len(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, events: &[SchedulerEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = match self.listeners.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for event in events {
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Forwards events into an unbounded tokio channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SchedulerListener for ChannelListener {
    fn on_event(&self, event: &SchedulerEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!(event = event.tag(), "event receiver dropped");
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl SchedulerListener for LoggingListener {
    fn on_event(&self, event: &SchedulerEvent) {
        info!(event = event.tag(), job = %event.job(), "scheduler event");
    }
}

/// Status projection per job, maintained from the event stream alone.
#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: DashMap<JobId, JobStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, job: &JobId) -> Option<JobStatus> {
        self.statuses.get(job).map(|s| *s)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

impl SchedulerListener for StatusBoard {
    fn on_event(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::JobRemoved { job } => {
                self.statuses.remove(job);
            }
            other => {
                if let Some(status) = other.job_status() {
                    self.statuses.insert(other.job().clone(), status);
                }
            }
        }
    }
}
