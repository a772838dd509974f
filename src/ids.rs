// src/ids.rs

//! Job and task identifiers.
//!
//! A [`JobId`] pairs a monotonically increasing number with the job's
//! human-readable name. Equality, hashing and ordering only look at the
//! number.
//!
//! A [`TaskId`] identifies one runtime *instance* of a template task: the
//! template name plus an iteration index (bumped by LOOP) and a replication
//! index (bumped by REPLICATE). Its readable form appends `#iteration` and
//! `*replication` when they are non-zero, e.g. `T1#1`, `T1*2`, `T1#1*2`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Separator between a template name and its iteration index.
pub const ITERATION_SEPARATOR: char = '#';

/// Separator between a template name and its replication index.
pub const REPLICATION_SEPARATOR: char = '*';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobId {
    value: u64,
    name: String,
}

impl JobId {
    pub fn new(value: u64, name: impl Into<String>) -> Self {
        Self {
            value,
            name: name.into(),
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for JobId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for JobId {}

impl Hash for JobId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for JobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.value, self.name)
    }
}

/// Hands out job ids in strictly increasing order.
///
/// Injected into the scheduler rather than kept as process-wide state, so
/// several schedulers (or tests) never share a counter by accident.
#[derive(Debug)]
pub struct JobIdGenerator {
    next: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self, name: impl Into<String>) -> JobId {
        let value = self.next.fetch_add(1, AtomicOrdering::SeqCst);
        JobId::new(value, name)
    }

    /// Make sure future ids are strictly greater than `seen`.
    ///
    /// Used after recovery so reloaded jobs never collide with new ones.
    pub fn observe(&self, seen: &JobId) {
        self.next
            .fetch_max(seen.value.saturating_add(1), AtomicOrdering::SeqCst);
    }
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    job: JobId,
    name: String,
    iteration: u32,
    replication: u32,
}

impl TaskId {
    /// Id of the first instance of a template task.
    pub fn new(job: JobId, name: impl Into<String>) -> Self {
        Self::with_indices(job, name, 0, 0)
    }

    pub fn with_indices(
        job: JobId,
        name: impl Into<String>,
        iteration: u32,
        replication: u32,
    ) -> Self {
        Self {
            job,
            name: name.into(),
            iteration,
            replication,
        }
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    /// Template (base) name, without any index suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn replication(&self) -> u32 {
        self.replication
    }

    /// Same template and job, different indices.
    pub fn sibling(&self, iteration: u32, replication: u32) -> Self {
        Self::with_indices(self.job.clone(), self.name.clone(), iteration, replication)
    }

    /// Readable name, e.g. `T1`, `T1#2`, `T1*1`, `T1#2*1`.
    ///
    /// Results are keyed by this name.
    pub fn readable_name(&self) -> String {
        let mut out = self.name.clone();
        if self.iteration > 0 {
            out.push(ITERATION_SEPARATOR);
            out.push_str(&self.iteration.to_string());
        }
        if self.replication > 0 {
            out.push(REPLICATION_SEPARATOR);
            out.push_str(&self.replication.to_string());
        }
        out
    }

    /// Split a readable name back into `(base, iteration, replication)`.
    ///
    /// Returns `None` when an index suffix is present but not a number.
    pub fn parse_readable(readable: &str) -> Option<(String, u32, u32)> {
        let (rest, replication) = match readable.rsplit_once(REPLICATION_SEPARATOR) {
            Some((head, tail)) => (head, tail.parse().ok()?),
            None => (readable, 0),
        };
        let (base, iteration) = match rest.rsplit_once(ITERATION_SEPARATOR) {
            Some((head, tail)) => (head, tail.parse().ok()?),
            None => (rest, 0),
        };
        if base.is_empty() {
            return None;
        }
        Some((base.to_string(), iteration, replication))
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.iteration.cmp(&other.iteration))
            .then(self.replication.cmp(&other.replication))
            .then(self.job.cmp(&other.job))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.readable_name())
    }
}

/// Template name of a readable task name (`T1#2*1` -> `T1`).
pub fn base_name(readable: &str) -> &str {
    let end = readable
        .find([ITERATION_SEPARATOR, REPLICATION_SEPARATOR])
        .unwrap_or(readable.len());
    &readable[..end]
}
