// tests/graph.rs

use std::error::Error;
use std::sync::Arc;

use flowsched::dag::{TaskDescriptor, TaskGraph, TaskKind, TaskState, TaskSubset, TaskTemplate};
use flowsched::errors::SchedulerError;
use flowsched::ids::{JobId, TaskId};

type TestResult = Result<(), Box<dyn Error>>;

fn job() -> JobId {
    JobId::new(1, "graph")
}

fn id(name: &str) -> TaskId {
    TaskId::new(job(), name)
}

fn node(name: &str) -> TaskDescriptor {
    let template = Arc::new(TaskTemplate::new(name, TaskKind::default()));
    TaskDescriptor::new(id(name), template, 1, 2)
}

/// A -> B, A -> C, B -> D, C -> D
fn diamond() -> Result<TaskGraph, SchedulerError> {
    let mut g = TaskGraph::new();
    g.add_task(node("A"), &[])?;
    g.add_task(node("B"), &[id("A")])?;
    g.add_task(node("C"), &[id("A")])?;
    g.add_task(node("D"), &[id("B"), id("C")])?;
    Ok(g)
}

fn finish(g: &mut TaskGraph, name: &str) -> Result<Vec<TaskId>, SchedulerError> {
    g.mark_started(&id(name))?;
    g.mark_finished(&id(name), TaskState::Finished)
}

#[test]
fn initially_eligible_are_exactly_the_roots() -> TestResult {
    let mut g = diamond()?;
    g.add_task(node("E"), &[])?;
    assert_eq!(g.eligible_tasks(), vec![id("A"), id("E")]);
    g.check_invariants()?;
    Ok(())
}

#[test]
fn duplicate_id_and_self_loop_are_rejected() -> TestResult {
    let mut g = diamond()?;
    assert!(matches!(g.add_task(node("B"), &[]), Err(SchedulerError::Graph(_))));
    assert!(matches!(
        g.add_task(node("X"), &[id("X")]),
        Err(SchedulerError::Graph(_))
    ));
    assert!(matches!(
        g.add_task(node("Y"), &[id("missing")]),
        Err(SchedulerError::UnknownTask(_))
    ));
    // Rejected inserts leave nothing behind.
    assert_eq!(g.len(), 4);
    assert!(!g.contains(&id("X")));
    assert!(!g.contains(&id("Y")));
    Ok(())
}

#[test]
fn finishing_decrements_each_child_once() -> TestResult {
    let mut g = diamond()?;
    let eligible = finish(&mut g, "A")?;
    assert_eq!(eligible, vec![id("B"), id("C")]);
    assert_eq!(g.descriptor(&id("D"))?.unsatisfied_parents(), 2);

    assert!(finish(&mut g, "B")?.is_empty());
    assert_eq!(g.descriptor(&id("D"))?.unsatisfied_parents(), 1);
    assert_eq!(finish(&mut g, "C")?, vec![id("D")]);
    g.check_invariants()?;
    Ok(())
}

#[test]
fn finishing_a_task_that_is_not_running_is_an_invalid_state() -> TestResult {
    let mut g = diamond()?;
    assert!(matches!(
        g.mark_finished(&id("A"), TaskState::Finished),
        Err(SchedulerError::InvalidState(_))
    ));
    assert!(matches!(g.mark_started(&id("D")), Err(SchedulerError::InvalidState(_))));
    assert!(matches!(
        g.mark_started(&id("nope")),
        Err(SchedulerError::UnknownTask(_))
    ));
    Ok(())
}

#[test]
fn faulty_parent_leaves_children_waiting() -> TestResult {
    let mut g = diamond()?;
    g.mark_started(&id("A"))?;
    let eligible = g.mark_finished(&id("A"), TaskState::Faulty)?;
    assert!(eligible.is_empty());
    assert!(g.eligible_tasks().is_empty());
    assert_eq!(g.subset_of(&id("B"), false)?, TaskSubset::Waiting);
    assert_eq!(g.subset_of(&id("A"), false)?, TaskSubset::Terminal);
    g.check_invariants()?;
    Ok(())
}

#[test]
fn subsets_partition_the_live_tasks() -> TestResult {
    let mut g = diamond()?;
    finish(&mut g, "A")?;
    g.mark_started(&id("B"))?;

    assert_eq!(g.subset_of(&id("A"), false)?, TaskSubset::Terminal);
    assert_eq!(g.subset_of(&id("B"), false)?, TaskSubset::Running);
    assert_eq!(g.subset_of(&id("C"), false)?, TaskSubset::Eligible);
    assert_eq!(g.subset_of(&id("C"), true)?, TaskSubset::Paused);
    assert_eq!(g.subset_of(&id("D"), false)?, TaskSubset::Waiting);
    Ok(())
}

#[test]
fn remove_subtree_keeps_nodes_with_a_surviving_parent() -> TestResult {
    let mut g = diamond()?;
    g.add_task(node("E"), &[id("C")])?;
    finish(&mut g, "A")?;

    let removed = g.remove_subtree(&id("C"))?;
    assert_eq!(removed, vec![id("C"), id("E")]);
    assert!(g.contains(&id("D")));
    assert_eq!(g.descriptor(&id("D"))?.parents(), &[id("B")]);
    assert_eq!(g.descriptor(&id("D"))?.unsatisfied_parents(), 1);
    assert!(g.is_reserved(&id("C")));
    assert!(!g.contains(&id("C")));
    assert_eq!(g.retired_count(), 2);
    g.check_invariants()?;

    // Removing again refers to an id that is no longer live.
    assert!(matches!(
        g.remove_subtree(&id("C")),
        Err(SchedulerError::UnknownTask(_))
    ));

    assert_eq!(finish(&mut g, "B")?, vec![id("D")]);
    Ok(())
}

#[test]
fn remove_subtree_refuses_started_tasks() -> TestResult {
    let mut g = diamond()?;
    finish(&mut g, "A")?;
    g.mark_started(&id("C"))?;
    assert!(matches!(
        g.remove_subtree(&id("C")),
        Err(SchedulerError::InvalidState(_))
    ));
    assert!(g.contains(&id("C")));
    g.check_invariants()?;
    Ok(())
}

#[test]
fn has_children_and_enumeration_order_are_stable() -> TestResult {
    let g = diamond()?;
    assert!(g.has_children(&id("A"))?);
    assert!(!g.has_children(&id("D"))?);
    let names: Vec<&str> = g.ids().map(|t| t.name()).collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
    let sequences: Vec<u64> = g.tasks().map(|t| t.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn restart_returns_a_running_task_to_eligible() -> TestResult {
    let mut g = diamond()?;
    g.mark_started(&id("A"))?;
    g.mark_restart(&id("A"))?;
    assert_eq!(g.eligible_tasks(), vec![id("A")]);
    g.mark_started(&id("A"))?;
    assert_eq!(g.descriptor(&id("A"))?.attempts(), 2);
    Ok(())
}

#[test]
fn not_started_only_from_pending() -> TestResult {
    let mut g = diamond()?;
    g.mark_not_started(&id("D"))?;
    assert_eq!(g.descriptor(&id("D"))?.state(), TaskState::NotStarted);
    assert!(matches!(
        g.mark_not_started(&id("D")),
        Err(SchedulerError::InvalidState(_))
    ));
    assert_eq!(g.count_in_state(TaskState::NotStarted), 1);
    g.check_invariants()?;
    Ok(())
}
