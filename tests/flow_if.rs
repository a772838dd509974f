// tests/flow_if.rs

use std::error::Error;

use flowsched::dag::{FlowAction, FlowKind, JobTemplate};
use flowsched::ids::JobId;
use flowsched::job::{JobDescriptor, JobStatus, TaskOutcome, build_job_graph};
use flowsched::types::SchedulerSettings;
use flowsched_test_utils::{JobTemplateBuilder, drive_job, task, task_id};

type TestResult = Result<(), Box<dyn Error>>;

fn job_id() -> JobId {
    JobId::new(2, "branches")
}

fn build(template: JobTemplate) -> Result<JobDescriptor, Box<dyn Error>> {
    Ok(build_job_graph(job_id(), template, &SchedulerSettings::default())?)
}

fn choose(target: &str, else_target: &str) -> TaskOutcome {
    TaskOutcome::with_flow(
        "decided",
        FlowAction::If {
            target: target.to_string(),
            else_target: else_target.to_string(),
            continuation: None,
        },
    )
}

/// A chooses between B and C; D joins.
fn with_continuation() -> Result<JobDescriptor, Box<dyn Error>> {
    build(
        JobTemplateBuilder::new("branches")
            .with_task(task("A").if_flow("B", "C", Some("D")))
            .with_task(task("B"))
            .with_task(task("C"))
            .with_task(task("D"))
            .build(),
    )
}

fn skipped_names(job: &JobDescriptor) -> Vec<String> {
    job.results()
        .skipped()
        .iter()
        .map(|t| t.readable_name())
        .collect()
}

#[test]
fn taken_branch_runs_and_the_other_is_pruned() -> TestResult {
    let mut job = with_continuation()?;
    let a = task_id(&job_id(), "A");
    job.start_task(&a)?;
    let step = job.on_task_terminal(&a, choose("B", "C"))?;

    let flow = step.flow.expect("if applied");
    assert_eq!(flow.kind, FlowKind::If);
    assert_eq!(flow.pruned, vec![task_id(&job_id(), "C")]);
    assert_eq!(flow.rewired, vec![task_id(&job_id(), "D")]);
    assert_eq!(step.newly_eligible, vec![task_id(&job_id(), "B")]);
    assert!(job.graph().is_reserved(&task_id(&job_id(), "C")));
    assert_eq!(
        job.graph().descriptor(&task_id(&job_id(), "D"))?.parents(),
        &[task_id(&job_id(), "B")]
    );
    job.graph().check_invariants()?;
    Ok(())
}

#[test]
fn continuation_runs_after_the_taken_branch_only() -> TestResult {
    let mut job = with_continuation()?;
    let executed = drive_job(&mut job, |r| match r.task.name() {
        "A" => choose("C", "B"),
        _ => TaskOutcome::success(1),
    });
    assert_eq!(executed, vec!["A", "C", "D"]);
    assert_eq!(job.status(), JobStatus::Finished);
    assert_eq!(skipped_names(&job), vec!["B"]);

    let counters = job.counters();
    assert_eq!(counters.total, 4);
    assert_eq!(counters.finished, 4);
    assert_eq!(job.results().len() + job.results().skipped_count(), 4);
    Ok(())
}

#[test]
fn plain_success_takes_the_declared_target() -> TestResult {
    let mut job = with_continuation()?;
    let executed = drive_job(&mut job, |_| TaskOutcome::success(1));
    assert_eq!(executed, vec!["A", "B", "D"]);
    assert_eq!(skipped_names(&job), vec!["C"]);
    Ok(())
}

#[test]
fn undeclared_branch_falls_back_to_the_declared_target() -> TestResult {
    let mut job = with_continuation()?;
    let a = task_id(&job_id(), "A");
    job.start_task(&a)?;
    let step = job.on_task_terminal(&a, choose("Z", "C"))?;
    assert!(step.flow_error.is_some());
    assert_eq!(step.flow.expect("fallback").pruned, vec![task_id(&job_id(), "C")]);
    let tags: Vec<&str> = job.drain_events().iter().map(|e| e.tag()).collect();
    assert!(tags.contains(&"task_flow_error"));
    assert!(tags.contains(&"task_skipped"));
    Ok(())
}

#[test]
fn wrong_continuation_is_rejected() -> TestResult {
    let mut job = with_continuation()?;
    let a = task_id(&job_id(), "A");
    job.start_task(&a)?;
    let outcome = TaskOutcome::with_flow(
        1,
        FlowAction::If {
            target: "B".to_string(),
            else_target: "C".to_string(),
            continuation: Some("A".to_string()),
        },
    );
    let step = job.on_task_terminal(&a, outcome)?;
    assert!(step.flow_error.is_some());
    // The fallback still picks a branch.
    assert_eq!(job.graph().len(), 3);
    Ok(())
}

#[test]
fn diamond_join_survives_pruning() -> TestResult {
    let mut job = build(
        JobTemplateBuilder::new("branches")
            .with_task(task("A").if_flow("B", "C", None))
            .with_task(task("B"))
            .with_task(task("C"))
            .with_task(task("D").after("B").after("C"))
            .build(),
    )?;
    let executed = drive_job(&mut job, |r| match r.task.name() {
        "A" => choose("B", "C"),
        _ => TaskOutcome::success(1),
    });
    assert_eq!(executed, vec!["A", "B", "D"]);
    assert_eq!(skipped_names(&job), vec!["C"]);
    assert_eq!(job.status(), JobStatus::Finished);
    Ok(())
}

#[test]
fn dropped_block_branch_is_pruned_whole() -> TestResult {
    let mut job = build(
        JobTemplateBuilder::new("branches")
            .with_task(task("A").if_flow("B", "X", Some("J")))
            .with_task(task("B").start("BE"))
            .with_task(task("BE").after("B").end())
            .with_task(task("X"))
            .with_task(task("J"))
            .build(),
    )?;
    let executed = drive_job(&mut job, |r| match r.task.name() {
        "A" => choose("X", "B"),
        _ => TaskOutcome::success(1),
    });
    assert_eq!(executed, vec!["A", "X", "J"]);
    assert_eq!(skipped_names(&job), vec!["B", "BE"]);
    assert_eq!(job.graph().retired_count(), 2);
    Ok(())
}

#[test]
fn branch_that_is_the_continuation_prunes_nothing() -> TestResult {
    let mut job = build(
        JobTemplateBuilder::new("branches")
            .with_task(task("A").if_flow("B", "C", Some("B")))
            .with_task(task("B"))
            .with_task(task("C"))
            .build(),
    )?;
    let executed = drive_job(&mut job, |r| match r.task.name() {
        "A" => choose("C", "B"),
        _ => TaskOutcome::success(1),
    });
    assert_eq!(executed, vec!["A", "C", "B"]);
    assert!(job.results().skipped().is_empty());
    assert_eq!(job.status(), JobStatus::Finished);
    Ok(())
}
