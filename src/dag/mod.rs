// src/dag/mod.rs

//! Task graphs and flow control.
//!
//! - [`template`] holds the static job description and its validated graph.
//! - [`graph`] is the live, per-job arena of task instances.
//! - [`flow`] plans and commits LOOP / REPLICATE / IF graph edits.
//! - [`flow_step`] defines the summary returned by a committed edit.
//! - [`dispatch`] defines what is sent to executors.

pub mod dispatch;
pub mod flow;
pub mod flow_step;
pub mod graph;
pub mod template;

pub use dispatch::DispatchRequest;
pub use flow::{ExecutionBudget, FlowAction, FlowEngine, GraphEdit};
pub use flow_step::{FlowKind, GraphStep};
pub use graph::{TaskDescriptor, TaskGraph, TaskState, TaskSubset};
pub use template::{FlowBlock, FlowSpec, JobTemplate, TaskKind, TaskTemplate, TemplateGraph};
