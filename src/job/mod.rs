// src/job/mod.rs

//! Jobs: building a live graph from a template, the per-job status machine,
//! results and snapshots.

mod builder;
mod descriptor;
mod outcome;
mod result;
mod snapshot;
mod status;

pub use builder::{build_job_graph, validate_template};
pub use descriptor::{JobDescriptor, JobStep, TaskControl};
pub use outcome::TaskOutcome;
pub use result::{JobResult, ResultAggregator, ResultValue, TaskResult};
pub use snapshot::{JobSnapshot, TaskSnapshot};
pub use status::{JobCounters, JobStatus};
