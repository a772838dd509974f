// tests/policy.rs

use std::error::Error;
use std::sync::Arc;

use flowsched::engine::Scheduler;
use flowsched::policy::FifoPolicy;
use flowsched::types::{JobPriority, PolicyKind, SchedulerSettings};
use flowsched_test_utils::{JobTemplateBuilder, task};

type TestResult = Result<(), Box<dyn Error>>;

fn two_jobs(scheduler: &Scheduler) -> Result<(), Box<dyn Error>> {
    scheduler.submit(
        JobTemplateBuilder::new("background")
            .priority(JobPriority::Low)
            .with_task(task("A"))
            .with_task(task("B"))
            .build(),
    )?;
    scheduler.submit(
        JobTemplateBuilder::new("urgent")
            .priority(JobPriority::Highest)
            .with_task(task("X"))
            .build(),
    )?;
    Ok(())
}

fn dispatch_order(scheduler: &Scheduler) -> Vec<String> {
    scheduler
        .schedule()
        .iter()
        .map(|r| format!("{}:{}", r.task.job().name(), r.task.readable_name()))
        .collect()
}

#[test]
fn priority_policy_serves_urgent_jobs_first() -> TestResult {
    let scheduler = Scheduler::new(SchedulerSettings::default());
    two_jobs(&scheduler)?;
    assert_eq!(scheduler.policy_name(), "priority");
    assert_eq!(
        dispatch_order(&scheduler),
        vec!["urgent:X", "background:A", "background:B"]
    );
    Ok(())
}

#[test]
fn fifo_policy_ignores_priority() -> TestResult {
    let settings = SchedulerSettings {
        policy: PolicyKind::Fifo,
        ..SchedulerSettings::default()
    };
    let scheduler = Scheduler::new(settings);
    two_jobs(&scheduler)?;
    assert_eq!(
        dispatch_order(&scheduler),
        vec!["background:A", "background:B", "urgent:X"]
    );
    Ok(())
}

#[test]
fn policy_can_be_swapped_between_rounds() -> TestResult {
    let scheduler = Scheduler::new(SchedulerSettings::default());
    two_jobs(&scheduler)?;
    scheduler.set_policy(Arc::new(FifoPolicy));
    assert_eq!(scheduler.policy_name(), "fifo");
    assert_eq!(dispatch_order(&scheduler)[0], "background:A");
    Ok(())
}

#[test]
fn raising_priority_reorders_pending_work() -> TestResult {
    let scheduler = Scheduler::new(SchedulerSettings::default());
    two_jobs(&scheduler)?;
    let background = scheduler.job_ids()[0].clone();
    scheduler.change_priority(&background, JobPriority::Highest)?;
    // Same priority: the older job wins.
    assert_eq!(dispatch_order(&scheduler)[0], "background:A");
    Ok(())
}
