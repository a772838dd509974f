// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous "core runtime" that consumes
//! [`RuntimeEvent`]s and produces a list of commands describing what the IO
//! shell should do next.
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels and the scheduling timer
//! - sending `DispatchRequest`s to the executor
//! - handling Ctrl+C / shutdown
//!
//! The core can be unit tested without any Tokio, channels or executors.

use std::sync::Arc;

use crate::engine::event_handlers::{
    CoreStep, JobControl, handle_job_control, handle_task_control, handle_task_terminated,
    schedule_round,
};
use crate::engine::registry::Scheduler;
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::job::TaskControl;

/// Pure core runtime state.
///
/// The scheduler is shared: callers may keep their own handle to submit
/// jobs or register listeners while the runtime drives it.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Arc<Scheduler>,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(scheduler: Arc<Scheduler>, options: RuntimeOptions) -> Self {
        Self { scheduler, options }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Expose whether every job is terminal (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Handle a single runtime event and return the resulting commands for
    /// the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let scheduler = self.scheduler.as_ref();
        match event {
            RuntimeEvent::TaskTerminated { task, outcome } => {
                handle_task_terminated(scheduler, &self.options, task, outcome)
            }
            RuntimeEvent::KillJob { job } => {
                handle_job_control(scheduler, &self.options, job, JobControl::Kill)
            }
            RuntimeEvent::PauseJob { job } => {
                handle_job_control(scheduler, &self.options, job, JobControl::Pause)
            }
            RuntimeEvent::ResumeJob { job } => {
                handle_job_control(scheduler, &self.options, job, JobControl::Resume)
            }
            RuntimeEvent::KillTask { task } => {
                handle_task_control(scheduler, &self.options, task, TaskControl::Kill)
            }
            RuntimeEvent::RestartTask { task } => {
                handle_task_control(scheduler, &self.options, task, TaskControl::Restart)
            }
            RuntimeEvent::PreemptTask { task } => {
                handle_task_control(scheduler, &self.options, task, TaskControl::Preempt)
            }
            RuntimeEvent::ScheduleTick => schedule_round(scheduler, &self.options),
            RuntimeEvent::ShutdownRequested => CoreStep::stop(),
        }
    }
}
