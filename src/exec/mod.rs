// src/exec/mod.rs

//! Execution boundary.
//!
//! Task bodies never run inside the scheduler. The runtime hands
//! [`DispatchRequest`](crate::dag::DispatchRequest)s to an
//! [`ExecutorBackend`] and outcomes come back as
//! [`RuntimeEvent::TaskTerminated`](crate::engine::RuntimeEvent).
//!
//! - [`backend`] provides the `ExecutorBackend` trait and
//!   `ChannelExecutorBackend`, which forwards requests to an external
//!   collaborator over an mpsc channel.
//! - [`simulated`] completes tasks in-process from a [`SimulationPlan`];
//!   used by the CLI to exercise job files end to end.

pub mod backend;
pub mod simulated;

pub use backend::{ChannelExecutorBackend, ExecutorBackend};
pub use simulated::{IfBranch, SimulatedExecutorBackend, SimulationPlan};
