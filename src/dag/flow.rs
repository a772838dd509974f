// src/dag/flow.rs

//! Flow control engine.
//!
//! Applying a flow action is split in two:
//! - [`FlowEngine::plan`] reads the graph and produces a [`GraphEdit`], or
//!   rejects the action with `InvalidFlowAction`;
//! - [`GraphEdit::apply`] commits the edit and cannot fail.
//!
//! A rejected action therefore never leaves a half-edited graph behind.
//!
//! Clones are built from the [`TemplateGraph`], not from the live instances,
//! so a loop body re-creates IF branches that an earlier iteration pruned.
//! Indices compound: a LOOP clone takes the finishing instance's iteration
//! plus one and keeps its replication. When an id of that iteration is
//! already in use (an inner loop got there first), the whole body moves to
//! the next iteration free for every member, so one generation shares one
//! index;
//! a REPLICATE clone keeps the branch's iteration and takes the next free
//! replication index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::flow_step::{FlowKind, GraphStep};
use crate::dag::graph::{TaskDescriptor, TaskGraph, TaskState};
use crate::dag::template::{FlowSpec, TaskTemplate, TemplateGraph};
use crate::errors::{Result, SchedulerError};
use crate::ids::{TaskId, base_name};

/// Control-flow decision attached to a successful task outcome.
///
/// Branch and target names are template names; an index suffix, if present,
/// is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowAction {
    Continue,
    /// `target` is the branch to run, `else_target` the one to drop.
    If {
        target: String,
        else_target: String,
        #[serde(default)]
        continuation: Option<String>,
    },
    /// Run the block from `target` up to the finishing task again when
    /// `repeat` is set.
    Loop { target: String, repeat: bool },
    Replicate { runs: u32 },
}

impl FlowAction {
    pub fn kind(&self) -> FlowKind {
        match self {
            FlowAction::Continue => FlowKind::Continue,
            FlowAction::If { .. } => FlowKind::If,
            FlowAction::Loop { .. } => FlowKind::Loop,
            FlowAction::Replicate { .. } => FlowKind::Replicate,
        }
    }

    /// Action equivalent to finishing without a flow decision, given what
    /// the task declared.
    ///
    /// An IF task must still drop one branch, so it falls back to its
    /// declared target. LOOP stops looping; REPLICATE runs once.
    pub fn fallback_for(declared: Option<&FlowSpec>) -> FlowAction {
        match declared {
            Some(FlowSpec::If {
                target,
                else_target,
                continuation,
            }) => FlowAction::If {
                target: target.clone(),
                else_target: else_target.clone(),
                continuation: continuation.clone(),
            },
            _ => FlowAction::Continue,
        }
    }
}

/// Execution budget handed to newly created descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBudget {
    pub max_number_of_execution: u32,
    pub max_number_of_execution_on_failure: u32,
}

impl ExecutionBudget {
    pub fn descriptor(&self, id: TaskId, template: Arc<TaskTemplate>) -> TaskDescriptor {
        let executions = template
            .max_number_of_execution
            .unwrap_or(self.max_number_of_execution)
            .max(1);
        let on_failure = template
            .max_number_of_execution_on_failure
            .unwrap_or(self.max_number_of_execution_on_failure)
            .max(1);
        TaskDescriptor::new(id, template, executions, on_failure)
    }
}

/// A validated, not yet committed, set of graph changes.
#[derive(Debug, Clone)]
pub struct GraphEdit {
    kind: FlowKind,
    new_nodes: Vec<TaskDescriptor>,
    unlink: Vec<(TaskId, TaskId)>,
    link: Vec<(TaskId, TaskId)>,
    prune: Vec<TaskId>,
    rewired: Vec<TaskId>,
}

impl GraphEdit {
    fn empty(kind: FlowKind) -> Self {
        Self {
            kind,
            new_nodes: Vec::new(),
            unlink: Vec::new(),
            link: Vec::new(),
            prune: Vec::new(),
            rewired: Vec::new(),
        }
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Commit the edit.
    pub fn apply(self, graph: &mut TaskGraph) -> GraphStep {
        let created: Vec<TaskId> = self.new_nodes.iter().map(|n| n.id().clone()).collect();
        for node in self.new_nodes {
            graph.insert_node(node);
        }
        for (parent, child) in &self.unlink {
            graph.unlink(parent, child);
        }
        for (parent, child) in &self.link {
            graph.link(parent, child);
        }
        graph.detach(&self.prune);

        GraphStep {
            kind: self.kind,
            created,
            pruned: self.prune,
            rewired: self.rewired,
        }
    }
}

/// Read-only planner over one job's live graph and its template.
pub struct FlowEngine<'a> {
    graph: &'a TaskGraph,
    templates: &'a TemplateGraph,
    budget: ExecutionBudget,
}

impl<'a> FlowEngine<'a> {
    pub fn new(graph: &'a TaskGraph, templates: &'a TemplateGraph, budget: ExecutionBudget) -> Self {
        Self {
            graph,
            templates,
            budget,
        }
    }

    /// Validate `action` for the running task `initiator` and compute the
    /// graph edit it implies.
    pub fn plan(&self, initiator: &TaskId, action: &FlowAction) -> Result<GraphEdit> {
        let node = self.graph.descriptor(initiator)?;
        if node.state() != TaskState::Running {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!("initiator is {:?}, expected Running", node.state()),
            ));
        }
        let declared = node.template().flow.as_ref();

        match action {
            FlowAction::Continue => Ok(GraphEdit::empty(FlowKind::Continue)),
            FlowAction::If {
                target,
                else_target,
                continuation,
            } => self.plan_if(initiator, declared, target, else_target, continuation.as_deref()),
            FlowAction::Loop { target, repeat } => {
                self.plan_loop(initiator, declared, target, *repeat)
            }
            FlowAction::Replicate { runs } => self.plan_replicate(initiator, declared, *runs),
        }
    }

    fn plan_if(
        &self,
        initiator: &TaskId,
        declared: Option<&FlowSpec>,
        target: &str,
        else_target: &str,
        continuation: Option<&str>,
    ) -> Result<GraphEdit> {
        let Some(FlowSpec::If {
            target: d_target,
            else_target: d_else,
            continuation: d_cont,
        }) = declared
        else {
            return Err(SchedulerError::invalid_flow(initiator, "task does not declare an IF"));
        };

        let (keep, drop) = (base_name(target), base_name(else_target));
        if keep == drop {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!("IF branches must differ (both '{keep}')"),
            ));
        }
        let declared_pair = (keep == d_target && drop == d_else) || (keep == d_else && drop == d_target);
        if !declared_pair {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!(
                    "IF branches ('{keep}', '{drop}') do not match the declared ('{d_target}', '{d_else}')"
                ),
            ));
        }
        let join = match (continuation.map(base_name), d_cont.as_deref()) {
            (Some(given), Some(expected)) if given != expected => {
                return Err(SchedulerError::invalid_flow(
                    initiator,
                    format!("IF continuation '{given}' does not match the declared '{expected}'"),
                ));
            }
            (Some(given), None) => {
                return Err(SchedulerError::invalid_flow(
                    initiator,
                    format!("IF continuation '{given}' was not declared"),
                ));
            }
            (_, expected) => expected,
        };

        let kept = self.pending_child(initiator, keep)?;
        let dropped = self.pending_child(initiator, drop)?;

        let mut edit = GraphEdit::empty(FlowKind::If);
        if join == Some(drop) {
            // The untaken branch is the continuation itself: nothing to drop.
            info!(task = %initiator, branch = %kept, "IF selects branch; other branch is empty");
            return Ok(edit);
        }

        let mut protect: HashSet<TaskId> = self
            .graph
            .tasks()
            .filter(|n| Some(n.id().name()) == join)
            .map(|n| n.id().clone())
            .collect();
        protect.insert(kept.clone());

        let pruned = self.graph.subtree_to_remove(&dropped, &protect)?;
        let pruned_set: HashSet<&TaskId> = pruned.iter().collect();
        edit.rewired = self
            .graph
            .tasks()
            .filter(|n| !pruned_set.contains(n.id()))
            .filter(|n| n.parents().iter().any(|p| pruned_set.contains(p)))
            .map(|n| n.id().clone())
            .collect();
        info!(
            task = %initiator,
            branch = %kept,
            pruned = pruned.len(),
            "IF selects branch; pruning the other"
        );
        edit.prune = pruned;
        Ok(edit)
    }

    fn plan_loop(
        &self,
        initiator: &TaskId,
        declared: Option<&FlowSpec>,
        target: &str,
        repeat: bool,
    ) -> Result<GraphEdit> {
        let Some(FlowSpec::Loop { target: d_target }) = declared else {
            return Err(SchedulerError::invalid_flow(initiator, "task does not declare a LOOP"));
        };
        let target = base_name(target);
        if target != d_target {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!("LOOP target '{target}' does not match the declared '{d_target}'"),
            ));
        }
        if !repeat {
            debug!(task = %initiator, "LOOP exits");
            return Ok(GraphEdit::empty(FlowKind::Loop));
        }

        let body = self.templates.nodes_between(target, initiator.name());
        if body.is_empty() {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!("'{}' is not reachable from LOOP target '{target}'", initiator.name()),
            ));
        }

        let clone_id = |name: &str, iteration: u32| {
            TaskId::with_indices(
                initiator.job().clone(),
                name.to_string(),
                iteration,
                initiator.replication(),
            )
        };
        // One iteration for the whole body, free for every member.
        let mut iteration = initiator.iteration() + 1;
        while body
            .iter()
            .any(|name| self.graph.is_reserved(&clone_id(name, iteration)))
        {
            iteration += 1;
        }

        let mut edit = GraphEdit::empty(FlowKind::Loop);
        let mut clones: HashMap<String, TaskId> = HashMap::new();
        for name in &body {
            let id = clone_id(name, iteration);
            clones.insert(name.clone(), id.clone());
            edit.new_nodes.push(self.descriptor_for(name, id)?);
        }

        self.wire_clone(&body, target, &clones, initiator.replication(), &mut edit)?;
        edit.link.push((initiator.clone(), clones[target].clone()));

        // Whatever followed the finishing task now follows its clone.
        let new_end = clones[initiator.name()].clone();
        for child in self.graph.descriptor(initiator)?.children() {
            edit.unlink.push((initiator.clone(), child.clone()));
            edit.link.push((new_end.clone(), child.clone()));
            edit.rewired.push(child.clone());
        }

        info!(
            task = %initiator,
            target = %target,
            clones = edit.new_nodes.len(),
            "LOOP repeats block"
        );
        Ok(edit)
    }

    fn plan_replicate(
        &self,
        initiator: &TaskId,
        declared: Option<&FlowSpec>,
        runs: u32,
    ) -> Result<GraphEdit> {
        if !matches!(declared, Some(FlowSpec::Replicate)) {
            return Err(SchedulerError::invalid_flow(initiator, "task does not declare a REPLICATE"));
        }
        if runs < 1 {
            return Err(SchedulerError::invalid_flow(
                initiator,
                format!("REPLICATE runs must be >= 1 (got {runs})"),
            ));
        }
        let mut edit = GraphEdit::empty(FlowKind::Replicate);
        if runs == 1 {
            return Ok(edit);
        }

        let branches: Vec<TaskId> = self
            .graph
            .descriptor(initiator)?
            .children()
            .iter()
            .filter(|c| self.graph.get(c).map(|n| n.state()) == Some(TaskState::Pending))
            .cloned()
            .collect();
        if branches.is_empty() {
            return Err(SchedulerError::invalid_flow(initiator, "REPLICATE has no pending branch"));
        }

        let mut allocated: HashSet<TaskId> = HashSet::new();
        for start in &branches {
            let end_name = self.templates.block_end(start.name()).to_string();
            let body = self.templates.nodes_between(start.name(), &end_name);
            if body.is_empty() {
                return Err(SchedulerError::invalid_flow(
                    initiator,
                    format!("block '{}' has no reachable end '{end_name}'", start.name()),
                ));
            }
            let end = self.find_below(start, &end_name).ok_or_else(|| {
                SchedulerError::invalid_flow(
                    initiator,
                    format!("could not find block end '{end_name}' below '{start}'"),
                )
            })?;
            let merges: Vec<TaskId> = self.graph.descriptor(&end)?.children().to_vec();

            for _ in 1..runs {
                let mut clones: HashMap<String, TaskId> = HashMap::new();
                for name in &body {
                    let replication = self.next_replication(name, start.iteration(), &allocated);
                    let id = TaskId::with_indices(
                        initiator.job().clone(),
                        name.clone(),
                        start.iteration(),
                        replication,
                    );
                    allocated.insert(id.clone());
                    clones.insert(name.clone(), id.clone());
                    edit.new_nodes.push(self.descriptor_for(name, id)?);
                }
                self.wire_clone(&body, start.name(), &clones, start.replication(), &mut edit)?;
                edit.link.push((initiator.clone(), clones[start.name()].clone()));
                for merge in &merges {
                    edit.link.push((clones[end_name.as_str()].clone(), merge.clone()));
                    if !edit.rewired.contains(merge) {
                        edit.rewired.push(merge.clone());
                    }
                }
            }
        }

        info!(
            task = %initiator,
            runs,
            clones = edit.new_nodes.len(),
            "REPLICATE spawns parallel branches"
        );
        Ok(edit)
    }

    /// Copy the template edges inside `body` onto the clones. Template
    /// parents outside the body are resolved to their latest live instance.
    /// The body's `head` only gets the edge the caller adds.
    fn wire_clone(
        &self,
        body: &[String],
        head: &str,
        clones: &HashMap<String, TaskId>,
        replication: u32,
        edit: &mut GraphEdit,
    ) -> Result<()> {
        for name in body {
            if name == head {
                continue;
            }
            let child = &clones[name];
            for parent in self.templates.parents_of(name) {
                if let Some(clone) = clones.get(parent) {
                    edit.link.push((clone.clone(), child.clone()));
                } else if let Some(outside) = self.latest_instance(parent, replication) {
                    edit.link.push((outside, child.clone()));
                } else {
                    return Err(SchedulerError::invalid_flow(
                        child,
                        format!("no live instance of dependency '{parent}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn descriptor_for(&self, name: &str, id: TaskId) -> Result<TaskDescriptor> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
        Ok(self.budget.descriptor(id, Arc::clone(template)))
    }

    fn pending_child(&self, initiator: &TaskId, name: &str) -> Result<TaskId> {
        self.graph
            .descriptor(initiator)?
            .children()
            .iter()
            .find(|c| {
                c.name() == name
                    && self.graph.get(c).map(|n| n.state()) == Some(TaskState::Pending)
            })
            .cloned()
            .ok_or_else(|| {
                SchedulerError::invalid_flow(
                    initiator,
                    format!("branch '{name}' is not a pending child of '{initiator}'"),
                )
            })
    }

    /// Instance named `name` reachable downward from `from` (inclusive),
    /// preferring the same indices as `from`.
    fn find_below(&self, from: &TaskId, name: &str) -> Option<TaskId> {
        let same = TaskId::with_indices(
            from.job().clone(),
            name.to_string(),
            from.iteration(),
            from.replication(),
        );
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut stack = vec![from.clone()];
        let mut found = None;
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if id == same {
                return Some(id);
            }
            if id.name() == name && found.is_none() {
                found = Some(id.clone());
            }
            if let Some(node) = self.graph.get(&id) {
                stack.extend(node.children().iter().cloned());
            }
        }
        found
    }

    /// Latest live instance of template `name`: same replication preferred,
    /// then the highest iteration.
    fn latest_instance(&self, name: &str, replication: u32) -> Option<TaskId> {
        self.graph
            .ids()
            .filter(|id| id.name() == name)
            .max_by_key(|id| (id.replication() == replication, id.iteration(), id.replication()))
            .cloned()
    }

    fn next_replication(&self, name: &str, iteration: u32, allocated: &HashSet<TaskId>) -> u32 {
        self.graph
            .ids()
            .chain(self.graph.retired())
            .chain(allocated.iter())
            .filter(|id| id.name() == name && id.iteration() == iteration)
            .map(|id| id.replication() + 1)
            .max()
            .unwrap_or(0)
    }
}
