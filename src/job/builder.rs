// src/job/builder.rs

//! Submission boundary: validate a [`JobTemplate`] and build its live graph.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::{ExecutionBudget, FlowBlock, FlowSpec, JobTemplate, TaskGraph, TaskTemplate, TemplateGraph};
use crate::errors::{Result, SchedulerError};
use crate::ids::{ITERATION_SEPARATOR, JobId, REPLICATION_SEPARATOR, TaskId};
use crate::job::descriptor::JobDescriptor;
use crate::types::SchedulerSettings;

/// Validate `template` and build the job's descriptor with every template
/// task instantiated once (iteration 0, replication 0).
///
/// Nothing is created when validation fails.
pub fn build_job_graph(
    id: JobId,
    template: JobTemplate,
    settings: &SchedulerSettings,
) -> Result<JobDescriptor> {
    let templates = validate_template(&template)?;
    let budget = ExecutionBudget {
        max_number_of_execution: settings.max_number_of_execution,
        max_number_of_execution_on_failure: settings.max_number_of_execution_on_failure,
    };

    let mut graph = TaskGraph::new();
    for task in templates.templates() {
        let task_id = TaskId::new(id.clone(), task.name.clone());
        graph.insert_node(budget.descriptor(task_id, Arc::clone(task)));
    }
    for (parent, child) in templates.edges() {
        graph.link(
            &TaskId::new(id.clone(), parent),
            &TaskId::new(id.clone(), child),
        );
    }
    debug!(job = %id, tasks = graph.len(), "job graph built");

    let cancel_job_on_error = template
        .cancel_job_on_error
        .unwrap_or(settings.cancel_job_on_error);
    Ok(JobDescriptor::new(
        id,
        template,
        Arc::new(templates),
        graph,
        budget,
        cancel_job_on_error,
    ))
}

/// Check names, references, flow blocks, flow declarations and acyclicity.
///
/// Returns the template graph with implicit IF edges wired in:
/// `initiator -> target`, `initiator -> else`, and, when a continuation is
/// declared, `branch end -> continuation` for both branches.
pub fn validate_template(template: &JobTemplate) -> Result<TemplateGraph> {
    if template.tasks.is_empty() {
        return Err(SchedulerError::Graph(format!(
            "job '{}' has no tasks",
            template.name
        )));
    }

    let by_name = validate_names(template)?;
    validate_dependencies(template, &by_name)?;
    validate_blocks(template, &by_name)?;
    validate_flow_declarations(template, &by_name)?;

    let edges = collect_edges(template, &by_name);
    validate_acyclic(template, &edges)?;

    let graph = TemplateGraph::new(template.tasks.iter().cloned(), edges);
    validate_block_reachability(template, &graph)?;
    validate_replicate_shapes(template, &graph)?;
    validate_loop_bodies(template, &graph)?;
    Ok(graph)
}

fn validate_names(template: &JobTemplate) -> Result<HashMap<&str, &TaskTemplate>> {
    let mut by_name = HashMap::new();
    for task in &template.tasks {
        let name = task.name.as_str();
        if name.trim().is_empty() {
            return Err(SchedulerError::Graph("task name must not be empty".to_string()));
        }
        if name.contains([ITERATION_SEPARATOR, REPLICATION_SEPARATOR]) {
            return Err(SchedulerError::Graph(format!(
                "task name '{name}' must not contain '{ITERATION_SEPARATOR}' or '{REPLICATION_SEPARATOR}'"
            )));
        }
        if by_name.insert(name, task).is_some() {
            return Err(SchedulerError::Graph(format!("duplicate task name '{name}'")));
        }
    }
    Ok(by_name)
}

fn validate_dependencies(template: &JobTemplate, by_name: &HashMap<&str, &TaskTemplate>) -> Result<()> {
    for task in &template.tasks {
        for dep in &task.dependencies {
            if !by_name.contains_key(dep.as_str()) {
                return Err(SchedulerError::UnknownTaskReference {
                    task: task.name.clone(),
                    reference: dep.clone(),
                });
            }
            if dep == &task.name {
                return Err(SchedulerError::Graph(format!(
                    "task '{}' cannot depend on itself",
                    task.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_blocks(template: &JobTemplate, by_name: &HashMap<&str, &TaskTemplate>) -> Result<()> {
    let mut closed_by: HashMap<&str, &str> = HashMap::new();

    for task in &template.tasks {
        match task.block {
            FlowBlock::Start => {
                let Some(end) = task.matching_block.as_deref() else {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        "block start has no matching_block",
                    ));
                };
                let end_task = by_name.get(end).ok_or_else(|| SchedulerError::UnknownTaskReference {
                    task: task.name.clone(),
                    reference: end.to_string(),
                })?;
                if end_task.block != FlowBlock::End {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        format!("matching block '{end}' is not a block end"),
                    ));
                }
                if let Some(previous) = closed_by.insert(end, task.name.as_str()) {
                    return Err(SchedulerError::invalid_definition(
                        end,
                        format!("block end is claimed by both '{previous}' and '{}'", task.name),
                    ));
                }
            }
            FlowBlock::End | FlowBlock::None => {}
        }
    }

    for task in &template.tasks {
        match task.block {
            FlowBlock::End => {
                let Some(start) = closed_by.get(task.name.as_str()) else {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        "block end is not matched by any block start",
                    ));
                };
                if let Some(declared) = task.matching_block.as_deref() {
                    if declared != *start {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            format!("matching_block '{declared}' does not name its start '{start}'"),
                        ));
                    }
                }
            }
            FlowBlock::None if task.matching_block.is_some() => {
                return Err(SchedulerError::invalid_definition(
                    &task.name,
                    "matching_block set on a task outside any block",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_flow_declarations(
    template: &JobTemplate,
    by_name: &HashMap<&str, &TaskTemplate>,
) -> Result<()> {
    let mut branch_owner: HashMap<&str, &str> = HashMap::new();

    for task in &template.tasks {
        match &task.flow {
            None | Some(FlowSpec::Replicate) => {}
            Some(FlowSpec::If {
                target,
                else_target,
                continuation,
            }) => {
                let then_task = lookup(by_name, task, target)?;
                let else_task = lookup(by_name, task, else_target)?;
                if target == else_target {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        "IF target and else must differ",
                    ));
                }
                for branch in [then_task, else_task] {
                    if branch.name == task.name {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            "IF cannot branch to itself",
                        ));
                    }
                    if !branch.dependencies.is_empty() {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            format!("IF branch '{}' must not have explicit dependencies", branch.name),
                        ));
                    }
                    if branch.block == FlowBlock::End {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            format!("IF branch '{}' cannot be a block end", branch.name),
                        ));
                    }
                    if let Some(other) = branch_owner.insert(branch.name.as_str(), task.name.as_str()) {
                        if other != task.name {
                            return Err(SchedulerError::invalid_definition(
                                &task.name,
                                format!("'{}' is already a branch of IF '{other}'", branch.name),
                            ));
                        }
                    }
                }
                if let Some(join) = continuation {
                    let join_task = lookup(by_name, task, join)?;
                    if join_task.name == task.name || join == else_target {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            format!("invalid IF continuation '{join}'"),
                        ));
                    }
                    if join != target && !join_task.dependencies.is_empty() {
                        return Err(SchedulerError::invalid_definition(
                            &task.name,
                            format!("IF continuation '{join}' must not have explicit dependencies"),
                        ));
                    }
                }
            }
            Some(FlowSpec::Loop { target }) => {
                let target_task = lookup(by_name, task, target)?;
                let self_loop = target_task.name == task.name
                    && task.block == FlowBlock::None;
                let block_loop = target_task.block == FlowBlock::Start
                    && target_task.matching_block.as_deref() == Some(task.name.as_str())
                    && task.block == FlowBlock::End;
                if !self_loop && !block_loop {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        format!(
                            "LOOP target '{target}' must be the task itself or the start of the block it ends"
                        ),
                    ));
                }
                if target_task.dependencies.len() > 1 {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        format!("LOOP target '{target}' has more than one dependency"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn lookup<'a>(
    by_name: &HashMap<&str, &'a TaskTemplate>,
    owner: &TaskTemplate,
    name: &str,
) -> Result<&'a TaskTemplate> {
    by_name
        .get(name)
        .copied()
        .ok_or_else(|| SchedulerError::UnknownTaskReference {
            task: owner.name.clone(),
            reference: name.to_string(),
        })
}

/// Explicit dependency edges followed by the implicit IF edges.
fn collect_edges(
    template: &JobTemplate,
    by_name: &HashMap<&str, &TaskTemplate>,
) -> Vec<(String, String)> {
    let branch_end = |name: &str| -> String {
        match by_name.get(name) {
            Some(t) if t.block == FlowBlock::Start => {
                t.matching_block.clone().unwrap_or_else(|| name.to_string())
            }
            _ => name.to_string(),
        }
    };

    let mut edges = Vec::new();
    for task in &template.tasks {
        for dep in &task.dependencies {
            edges.push((dep.clone(), task.name.clone()));
        }
    }
    for task in &template.tasks {
        if let Some(FlowSpec::If {
            target,
            else_target,
            continuation,
        }) = &task.flow
        {
            edges.push((task.name.clone(), target.clone()));
            edges.push((task.name.clone(), else_target.clone()));
            if let Some(join) = continuation {
                for branch in [target, else_target] {
                    let end = branch_end(branch);
                    if &end != join {
                        edges.push((end, join.clone()));
                    }
                }
            }
        }
    }
    edges
}

fn validate_acyclic(template: &JobTemplate, edges: &[(String, String)]) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in &template.tasks {
        graph.add_node(task.name.as_str());
    }
    for (from, to) in edges {
        graph.add_edge(from.as_str(), to.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedulerError::CyclicDependency(format!(
            "cycle detected in job graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_block_reachability(template: &JobTemplate, graph: &TemplateGraph) -> Result<()> {
    for task in template.tasks.iter().filter(|t| t.block == FlowBlock::Start) {
        let end = graph.block_end(&task.name);
        if graph.nodes_between(&task.name, end).is_empty() {
            return Err(SchedulerError::invalid_definition(
                &task.name,
                format!("block end '{end}' does not depend on block start"),
            ));
        }
    }
    Ok(())
}

fn validate_replicate_shapes(template: &JobTemplate, graph: &TemplateGraph) -> Result<()> {
    for task in &template.tasks {
        if task.flow != Some(FlowSpec::Replicate) {
            continue;
        }
        let children = graph.children_of(&task.name);
        if children.is_empty() {
            return Err(SchedulerError::invalid_definition(
                &task.name,
                "REPLICATE has nothing to replicate",
            ));
        }
        for child in children {
            if graph.parents_of(child).len() != 1 {
                return Err(SchedulerError::invalid_definition(
                    &task.name,
                    format!("replicated task '{child}' must depend only on the initiator"),
                ));
            }
            let Some(child_task) = graph.get(child) else {
                continue;
            };
            if child_task.block == FlowBlock::End {
                return Err(SchedulerError::invalid_definition(
                    &task.name,
                    format!("replicated task '{child}' cannot be a block end"),
                ));
            }
            let end = graph.block_end(child);
            if graph.children_of(end).is_empty() {
                return Err(SchedulerError::invalid_definition(
                    &task.name,
                    format!("replicated block ending at '{end}' has no merge task"),
                ));
            }
            if let Some(end_task) = graph.get(end) {
                if matches!(end_task.flow, Some(FlowSpec::If { .. }) | Some(FlowSpec::Replicate)) {
                    return Err(SchedulerError::invalid_definition(
                        &task.name,
                        format!("replicated block end '{end}' cannot perform IF or REPLICATE"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_loop_bodies(template: &JobTemplate, graph: &TemplateGraph) -> Result<()> {
    for task in &template.tasks {
        let Some(FlowSpec::Loop { target }) = &task.flow else {
            continue;
        };
        if graph.nodes_between(target, &task.name).is_empty() {
            return Err(SchedulerError::invalid_definition(
                &task.name,
                format!("LOOP target '{target}' does not lead to '{}'", task.name),
            ));
        }
    }
    Ok(())
}
