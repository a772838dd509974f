// src/engine/mod.rs

//! Orchestration engine for flowsched.
//!
//! This module ties together:
//! - the job registry ([`registry::Scheduler`])
//! - the main runtime event loop that reacts to:
//!   - task outcomes reported by executors
//!   - job control requests (kill, pause, resume)
//!   - task control requests (kill, restart, preempt)
//!   - periodic scheduling ticks
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::ids::{JobId, TaskId};
use crate::job::TaskOutcome;

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once every job is terminal.
    pub exit_when_idle: bool,
    /// Period of the scheduling tick.
    pub schedule_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            exit_when_idle: false,
            schedule_interval: Duration::from_millis(100),
        }
    }
}

/// Events flowing into the runtime from executors, operators and timers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched task reached an outcome.
    TaskTerminated { task: TaskId, outcome: TaskOutcome },
    KillJob { job: JobId },
    PauseJob { job: JobId },
    ResumeJob { job: JobId },
    KillTask { task: TaskId },
    RestartTask { task: TaskId },
    PreemptTask { task: TaskId },
    /// Run a scheduling round.
    ScheduleTick,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod registry;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use registry::Scheduler;
pub use runtime::Runtime;
