// src/dag/graph.rs

//! Live task graph of one job.
//!
//! An arena of [`TaskDescriptor`]s keyed by [`TaskId`]. Parent/child links
//! are stored as ids on both ends, never as pointers, so cloning a subgraph
//! during LOOP/REPLICATE is a matter of inserting entries and remapping ids.
//!
//! The eligible / running / paused subsets are not stored anywhere; they are
//! derived from each descriptor's [`TaskState`] and counters.
//!
//! Counter invariants, checked by [`TaskGraph::check_invariants`]:
//! - `unsatisfied_parents` == number of parents not in `Finished`
//! - `remaining_children` == number of children not yet terminal

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dag::template::TaskTemplate;
use crate::errors::{Result, SchedulerError};
use crate::ids::TaskId;

/// Runtime state of one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for parents, or eligible once they are all finished.
    Pending,
    Running,
    /// Finished successfully.
    Finished,
    /// Out of executions after errors.
    Faulty,
    /// Killed while running.
    Aborted,
    /// Will never run: an ancestor failed or the job was terminated.
    NotStarted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Faulty | TaskState::Aborted | TaskState::NotStarted
        )
    }
}

/// Which derived subset a task currently falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSubset {
    /// Pending, still waiting on at least one parent.
    Waiting,
    Eligible,
    Running,
    /// Would be eligible, but the job is paused.
    Paused,
    Terminal,
}

/// One runtime task instance.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    id: TaskId,
    template: Arc<TaskTemplate>,
    parents: Vec<TaskId>,
    children: Vec<TaskId>,
    unsatisfied_parents: usize,
    remaining_children: usize,
    state: TaskState,
    /// Remaining executions after user exceptions.
    executions_left: u32,
    /// Remaining executions after resource failures.
    failure_executions_left: u32,
    /// Number of times the task was dispatched.
    attempts: u32,
    /// Insertion order in the arena; used for stable enumeration.
    sequence: u64,
    /// Was running when the scheduler went down; held back until
    /// running tasks are restored.
    awaiting_restore: bool,
}

impl TaskDescriptor {
    pub fn new(
        id: TaskId,
        template: Arc<TaskTemplate>,
        executions: u32,
        failure_executions: u32,
    ) -> Self {
        Self {
            id,
            template,
            parents: Vec::new(),
            children: Vec::new(),
            unsatisfied_parents: 0,
            remaining_children: 0,
            state: TaskState::Pending,
            executions_left: executions,
            failure_executions_left: failure_executions,
            attempts: 0,
            sequence: 0,
            awaiting_restore: false,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn template(&self) -> &Arc<TaskTemplate> {
        &self.template
    }

    pub fn parents(&self) -> &[TaskId] {
        &self.parents
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn unsatisfied_parents(&self) -> usize {
        self.unsatisfied_parents
    }

    pub fn remaining_children(&self) -> usize {
        self.remaining_children
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn executions_left(&self) -> u32 {
        self.executions_left
    }

    pub fn failure_executions_left(&self) -> u32 {
        self.failure_executions_left
    }

    pub fn resources(&self) -> u32 {
        self.template.resources
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_awaiting_restore(&self) -> bool {
        self.awaiting_restore
    }

    pub fn is_eligible(&self) -> bool {
        self.state == TaskState::Pending && self.unsatisfied_parents == 0 && !self.awaiting_restore
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn set_counters(&mut self, attempts: u32, executions_left: u32, failures_left: u32) {
        self.attempts = attempts;
        self.executions_left = executions_left;
        self.failure_executions_left = failures_left;
    }

    pub(crate) fn set_awaiting_restore(&mut self, awaiting: bool) {
        self.awaiting_restore = awaiting;
    }

    /// Consume one execution after a user exception. Returns whether the
    /// task may run again.
    pub(crate) fn consume_execution(&mut self) -> bool {
        self.executions_left = self.executions_left.saturating_sub(1);
        self.executions_left > 0
    }

    /// Consume one execution after a resource failure. Returns whether the
    /// task may run again.
    pub(crate) fn consume_failure_execution(&mut self) -> bool {
        self.failure_executions_left = self.failure_executions_left.saturating_sub(1);
        self.failure_executions_left > 0
    }
}

/// Arena of task descriptors for a single job.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: IndexMap<TaskId, TaskDescriptor>,
    /// Ids removed from the live graph (pruned branches). Kept reserved so a
    /// later clone never reuses them.
    retired: IndexSet<TaskId>,
    next_sequence: u64,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskDescriptor> {
        self.nodes.get(id)
    }

    pub fn descriptor(&self, id: &TaskId) -> Result<&TaskDescriptor> {
        self.nodes
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))
    }

    pub(crate) fn descriptor_mut(&mut self, id: &TaskId) -> Result<&mut TaskDescriptor> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` is live or was retired; such ids must not be handed out.
    pub fn is_reserved(&self, id: &TaskId) -> bool {
        self.nodes.contains_key(id) || self.retired.contains(id)
    }

    pub fn retired(&self) -> impl Iterator<Item = &TaskId> {
        self.retired.iter()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Live descriptors, in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.nodes.keys()
    }

    /// Insert `descriptor` and wire `parents -> descriptor` edges.
    ///
    /// Fails without touching the graph when the id is already in use, a
    /// parent is unknown, or a parent is the task itself.
    pub fn add_task(&mut self, descriptor: TaskDescriptor, parents: &[TaskId]) -> Result<()> {
        let id = descriptor.id.clone();
        if self.is_reserved(&id) {
            return Err(SchedulerError::Graph(format!("duplicate task id '{id}'")));
        }
        for parent in parents {
            if parent == &id {
                return Err(SchedulerError::Graph(format!(
                    "task '{id}' cannot depend on itself"
                )));
            }
            if !self.nodes.contains_key(parent) {
                return Err(SchedulerError::UnknownTask(parent.to_string()));
            }
        }

        self.insert_node(descriptor);
        for parent in parents {
            self.link(parent, &id);
        }
        Ok(())
    }

    /// Insert a node without edges. The id must not be reserved.
    pub(crate) fn insert_node(&mut self, mut descriptor: TaskDescriptor) {
        descriptor.sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!(task = %descriptor.id, seq = descriptor.sequence, "inserting task node");
        self.nodes.insert(descriptor.id.clone(), descriptor);
    }

    /// Record a retired id, e.g. when reloading a persisted graph.
    pub(crate) fn reserve_retired(&mut self, id: TaskId) {
        self.retired.insert(id);
    }

    /// Wire `parent -> child` if both exist and the edge is new, keeping the
    /// counters in step with the endpoint states.
    pub(crate) fn link(&mut self, parent: &TaskId, child: &TaskId) {
        if parent == child {
            return;
        }
        let Some((parent_state, already)) = self
            .nodes
            .get(parent)
            .map(|p| (p.state, p.children.contains(child)))
        else {
            return;
        };
        if already {
            return;
        }
        let Some(child_node) = self.nodes.get_mut(child) else {
            return;
        };
        child_node.parents.push(parent.clone());
        if parent_state != TaskState::Finished {
            child_node.unsatisfied_parents += 1;
        }
        let child_terminal = child_node.state.is_terminal();

        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(child.clone());
            if !child_terminal {
                parent_node.remaining_children += 1;
            }
        }
    }

    /// Remove the `parent -> child` edge, undoing its counter contributions.
    pub(crate) fn unlink(&mut self, parent: &TaskId, child: &TaskId) {
        let Some(parent_state) = self.nodes.get(parent).map(|p| p.state) else {
            return;
        };
        let mut child_terminal = true;
        if let Some(child_node) = self.nodes.get_mut(child) {
            let before = child_node.parents.len();
            child_node.parents.retain(|p| p != parent);
            if child_node.parents.len() == before {
                return;
            }
            if parent_state != TaskState::Finished {
                child_node.unsatisfied_parents = child_node.unsatisfied_parents.saturating_sub(1);
            }
            child_terminal = child_node.state.is_terminal();
        }
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|c| c != child);
            if !child_terminal {
                parent_node.remaining_children = parent_node.remaining_children.saturating_sub(1);
            }
        }
    }

    /// Move an eligible task to `Running`.
    pub fn mark_started(&mut self, id: &TaskId) -> Result<()> {
        let node = self.descriptor_mut(id)?;
        if !node.is_eligible() {
            return Err(SchedulerError::InvalidState(format!(
                "task '{id}' started while not eligible (state {:?}, {} unsatisfied parents)",
                node.state, node.unsatisfied_parents
            )));
        }
        node.state = TaskState::Running;
        node.attempts += 1;
        debug!(task = %id, attempt = node.attempts, "task marked running");
        Ok(())
    }

    /// Move a running task to a terminal state.
    ///
    /// With `TaskState::Finished`, every child's unsatisfied-parent counter is
    /// decremented once; the children that became eligible are returned.
    /// Other terminal states leave children waiting; the caller decides their
    /// fate.
    pub fn mark_finished(&mut self, id: &TaskId, terminal: TaskState) -> Result<Vec<TaskId>> {
        if !terminal.is_terminal() {
            return Err(SchedulerError::InvalidState(format!(
                "cannot finish task '{id}' into non-terminal state {terminal:?}"
            )));
        }
        let node = self.descriptor(id)?;
        if node.state != TaskState::Running {
            return Err(SchedulerError::InvalidState(format!(
                "task '{id}' finished while not running (state {:?})",
                node.state
            )));
        }
        let children = node.children.clone();
        if terminal == TaskState::Finished {
            for child in &children {
                let c = self.descriptor(child)?;
                if c.unsatisfied_parents == 0 {
                    return Err(SchedulerError::InvalidState(format!(
                        "task '{child}' has no unsatisfied parent left for finishing '{id}'"
                    )));
                }
            }
        }

        self.set_terminal(id, terminal);

        let mut newly_eligible = Vec::new();
        if terminal == TaskState::Finished {
            for child in &children {
                if let Some(c) = self.nodes.get_mut(child) {
                    c.unsatisfied_parents -= 1;
                    if c.is_eligible() {
                        newly_eligible.push(child.clone());
                    }
                }
            }
        }
        debug!(task = %id, state = ?terminal, eligible = newly_eligible.len(), "task finished");
        Ok(newly_eligible)
    }

    /// Move a pending task straight to `NotStarted`.
    pub fn mark_not_started(&mut self, id: &TaskId) -> Result<()> {
        let node = self.descriptor(id)?;
        if node.state != TaskState::Pending {
            return Err(SchedulerError::InvalidState(format!(
                "task '{id}' cannot be skipped from state {:?}",
                node.state
            )));
        }
        self.set_terminal(id, TaskState::NotStarted);
        Ok(())
    }

    /// Put a running task back to `Pending` for another execution.
    pub fn mark_restart(&mut self, id: &TaskId) -> Result<()> {
        let node = self.descriptor_mut(id)?;
        if node.state != TaskState::Running {
            return Err(SchedulerError::InvalidState(format!(
                "task '{id}' restarted while not running (state {:?})",
                node.state
            )));
        }
        node.state = TaskState::Pending;
        Ok(())
    }

    /// Force a non-terminal task into a terminal state (job kill/cancel).
    pub(crate) fn force_terminal(&mut self, id: &TaskId, terminal: TaskState) {
        let current = match self.nodes.get(id) {
            Some(n) => n.state,
            None => return,
        };
        if current.is_terminal() {
            return;
        }
        self.set_terminal(id, terminal);
    }

    fn set_terminal(&mut self, id: &TaskId, terminal: TaskState) {
        let parents = match self.nodes.get_mut(id) {
            Some(node) => {
                node.state = terminal;
                node.awaiting_restore = false;
                node.parents.clone()
            }
            None => return,
        };
        for parent in &parents {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.remaining_children = p.remaining_children.saturating_sub(1);
            }
        }
    }

    /// Every eligible task, in insertion order.
    pub fn eligible_tasks(&self) -> Vec<TaskId> {
        self.nodes
            .values()
            .filter(|n| n.is_eligible())
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.ids_in_state(TaskState::Running)
    }

    pub fn ids_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.nodes
            .values()
            .filter(|n| n.state == state)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.nodes.values().filter(|n| n.state == state).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.state.is_terminal())
    }

    /// Subset a task falls into given whether its job is paused.
    pub fn subset_of(&self, id: &TaskId, job_paused: bool) -> Result<TaskSubset> {
        let node = self.descriptor(id)?;
        Ok(match node.state {
            TaskState::Running => TaskSubset::Running,
            s if s.is_terminal() => TaskSubset::Terminal,
            _ if !node.is_eligible() => TaskSubset::Waiting,
            _ if job_paused => TaskSubset::Paused,
            _ => TaskSubset::Eligible,
        })
    }

    pub fn has_children(&self, id: &TaskId) -> Result<bool> {
        Ok(!self.descriptor(id)?.children.is_empty())
    }

    /// Detach `root` and every descendant that has no live parent outside
    /// the detached set.
    ///
    /// A descendant reachable from a surviving parent stays, minus its edges
    /// to detached parents. Only never-started tasks can be detached; the
    /// ids are retired and returned in insertion order.
    pub fn remove_subtree(&mut self, root: &TaskId) -> Result<Vec<TaskId>> {
        let doomed = self.subtree_to_remove(root, &HashSet::new())?;
        self.detach(&doomed);
        Ok(doomed)
    }

    /// Compute what [`TaskGraph::remove_subtree`] would detach, without
    /// mutating. Tasks in `keep` are never detached.
    pub(crate) fn subtree_to_remove(
        &self,
        root: &TaskId,
        keep: &HashSet<TaskId>,
    ) -> Result<Vec<TaskId>> {
        self.descriptor(root)?;

        let mut below: HashSet<TaskId> = HashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            if !below.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().cloned());
            }
        }

        let mut doomed: HashSet<TaskId> = HashSet::new();
        if !keep.contains(root) {
            doomed.insert(root.clone());
        }

        // Fixpoint: a descendant goes once every one of its parents is gone.
        loop {
            let mut changed = false;
            for id in &below {
                if doomed.contains(id) || keep.contains(id) {
                    continue;
                }
                let Some(node) = self.nodes.get(id) else {
                    continue;
                };
                if !node.parents.is_empty() && node.parents.iter().all(|p| doomed.contains(p)) {
                    doomed.insert(id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for id in &doomed {
            let state = self.descriptor(id)?.state;
            if state != TaskState::Pending {
                return Err(SchedulerError::InvalidState(format!(
                    "cannot prune task '{id}' in state {state:?}"
                )));
            }
        }

        Ok(self
            .nodes
            .keys()
            .filter(|id| doomed.contains(*id))
            .cloned()
            .collect())
    }

    /// Remove `ids` from the live graph. Edges to surviving tasks are
    /// unlinked first so their counters stay consistent.
    pub(crate) fn detach(&mut self, ids: &[TaskId]) {
        let doomed: HashSet<&TaskId> = ids.iter().collect();
        for id in ids {
            let (parents, children) = match self.nodes.get(id) {
                Some(n) => (n.parents.clone(), n.children.clone()),
                None => continue,
            };
            for parent in parents.iter().filter(|p| !doomed.contains(p)) {
                self.unlink(parent, id);
            }
            for child in children.iter().filter(|c| !doomed.contains(c)) {
                self.unlink(id, child);
            }
        }
        for id in ids {
            if self.nodes.shift_remove(id).is_some() {
                debug!(task = %id, "task pruned from live graph");
                self.retired.insert(id.clone());
            }
        }
    }

    /// Verify the counter invariants listed in the module docs.
    pub fn check_invariants(&self) -> Result<()> {
        let mut expected_children: HashMap<&TaskId, usize> = HashMap::new();
        for node in self.nodes.values() {
            let mut unsatisfied = 0;
            for parent in &node.parents {
                let p = self.nodes.get(parent).ok_or_else(|| {
                    SchedulerError::InvalidState(format!(
                        "task '{}' has dangling parent '{parent}'",
                        node.id
                    ))
                })?;
                if !p.children.contains(&node.id) {
                    return Err(SchedulerError::InvalidState(format!(
                        "edge '{parent}' -> '{}' missing on parent side",
                        node.id
                    )));
                }
                if p.state != TaskState::Finished {
                    unsatisfied += 1;
                }
                if !node.state.is_terminal() {
                    *expected_children.entry(parent).or_default() += 1;
                }
            }
            if unsatisfied != node.unsatisfied_parents {
                return Err(SchedulerError::InvalidState(format!(
                    "task '{}' counts {} unsatisfied parents, expected {unsatisfied}",
                    node.id, node.unsatisfied_parents
                )));
            }
        }
        for node in self.nodes.values() {
            let expected = expected_children.get(&node.id).copied().unwrap_or(0);
            if expected != node.remaining_children {
                return Err(SchedulerError::InvalidState(format!(
                    "task '{}' counts {} remaining children, expected {expected}",
                    node.id, node.remaining_children
                )));
            }
            if node.children.len() != node.children.iter().collect::<HashSet<_>>().len() {
                return Err(SchedulerError::InvalidState(format!(
                    "task '{}' has duplicate child edges",
                    node.id
                )));
            }
        }
        Ok(())
    }
}
