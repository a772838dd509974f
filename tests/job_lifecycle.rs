// tests/job_lifecycle.rs

use std::error::Error;
use std::sync::Arc;

use flowsched::dag::{JobTemplate, TaskState};
use flowsched::engine::Scheduler;
use flowsched::errors::SchedulerError;
use flowsched::events::SchedulerEvent;
use flowsched::ids::JobId;
use flowsched::job::{JobStatus, TaskOutcome};
use flowsched::types::{JobPriority, SchedulerSettings};
use flowsched_test_utils::{
    JobTemplateBuilder, RecordingListener, drive, drive_with_successes, task, task_id,
};

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> JobTemplate {
    JobTemplateBuilder::new("chain")
        .with_task(task("A"))
        .with_task(task("B").after("A"))
        .build()
}

fn scheduler_with_listener() -> (Scheduler, Arc<RecordingListener>) {
    let scheduler = Scheduler::new(SchedulerSettings::default());
    let listener = Arc::new(RecordingListener::new());
    scheduler.add_listener(listener.clone());
    (scheduler, listener)
}

fn task_state(scheduler: &Scheduler, job: &JobId, name: &str) -> Result<TaskState, SchedulerError> {
    let id = task_id(job, name);
    scheduler.inspect(job, |j| j.graph().descriptor(&id).map(|n| n.state()))?
}

#[test]
fn chain_goes_through_the_whole_status_machine() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Pending);

    let executed = drive_with_successes(&scheduler);
    assert_eq!(executed, vec!["A", "B"]);
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Finished);
    assert_eq!(
        listener.tags_for(&job),
        vec![
            "job_submitted",
            "job_pending_to_running",
            "task_pending_to_running",
            "task_running_to_finished",
            "job_running_to_stalled",
            "job_stalled_to_running",
            "task_pending_to_running",
            "task_running_to_finished",
            "job_finished",
        ]
    );
    Ok(())
}

#[test]
fn pause_holds_new_work_and_resume_returns_to_stalled() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let started = scheduler.schedule();
    assert_eq!(started.len(), 1);

    assert!(scheduler.pause_job(&job)?);
    assert!(!scheduler.pause_job(&job)?);

    // The running task still reports in.
    let a = task_id(&job, "A");
    let step = scheduler.on_task_terminal(&a, TaskOutcome::success(1))?;
    assert_eq!(step.status, JobStatus::Paused);
    assert!(scheduler.schedule().is_empty());
    assert_eq!(
        scheduler.inspect(&job, |j| j.subset_of(&task_id(&job, "B")))??,
        flowsched::dag::TaskSubset::Paused
    );

    assert!(scheduler.resume_job(&job)?);
    assert!(!scheduler.resume_job(&job)?);
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Stalled);
    assert!(listener.events().contains(&SchedulerEvent::JobResumed {
        job: job.clone(),
        status: JobStatus::Stalled,
    }));

    drive_with_successes(&scheduler);
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Finished);
    Ok(())
}

#[test]
fn pause_before_start_resumes_to_pending() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    scheduler.pause_job(&job)?;
    assert!(scheduler.eligible_tasks().is_empty());
    scheduler.resume_job(&job)?;
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Pending);
    Ok(())
}

#[test]
fn paused_job_keeps_running_while_tasks_are_in_flight() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("pair")
            .with_task(task("A"))
            .with_task(task("B"))
            .with_task(task("C").after("A"))
            .build(),
    )?;
    scheduler.schedule();
    scheduler.pause_job(&job)?;
    scheduler.on_task_terminal(&task_id(&job, "A"), TaskOutcome::success(1))?;
    scheduler.resume_job(&job)?;
    // B is still running.
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Running);
    Ok(())
}

#[test]
fn terminal_jobs_cannot_be_paused() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    drive_with_successes(&scheduler);
    assert!(matches!(
        scheduler.pause_job(&job),
        Err(SchedulerError::InvalidState(_))
    ));
    assert!(!scheduler.resume_job(&job)?);
    Ok(())
}

#[test]
fn kill_aborts_running_and_skips_pending() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    scheduler.schedule();

    assert!(scheduler.kill_job(&job)?);
    assert!(!scheduler.kill_job(&job)?);
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Killed);
    assert_eq!(task_state(&scheduler, &job, "A")?, TaskState::Aborted);
    assert_eq!(task_state(&scheduler, &job, "B")?, TaskState::NotStarted);
    assert_eq!(listener.count("job_killed"), 1);

    // A late outcome for the aborted task is ignored.
    let step = scheduler.on_task_terminal(&task_id(&job, "A"), TaskOutcome::success(1))?;
    assert!(step.ignored);

    let result = scheduler.job_result(&job)?.expect("terminal job has a result");
    assert_eq!(result.status, JobStatus::Killed);
    assert_eq!(result.exceptions, vec!["A"]);
    assert_eq!(result.skipped, vec!["B"]);
    Ok(())
}

#[test]
fn user_exception_is_retried_within_the_execution_budget() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("retry")
            .with_task(task("A").executions(2))
            .with_task(task("B").after("A"))
            .build(),
    )?;

    let executed = drive(&scheduler, |_| TaskOutcome::user_exception("boom"));
    assert_eq!(executed, vec!["A", "A"]);
    assert_eq!(listener.count("task_waiting_for_restart"), 1);
    assert_eq!(task_state(&scheduler, &job, "A")?, TaskState::Faulty);
    assert_eq!(task_state(&scheduler, &job, "B")?, TaskState::NotStarted);

    // Without cancel-on-error the job still finishes, with an exception.
    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.status, JobStatus::Finished);
    assert!(result.had_exception());
    assert_eq!(result.results["A"].attempts, 2);
    assert_eq!(result.skipped, vec!["B"]);
    Ok(())
}

#[test]
fn default_budget_retries_resource_failures_only() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    scheduler.submit(chain())?;
    let executed = drive(&scheduler, |_| TaskOutcome::user_exception("boom"));
    assert_eq!(executed, vec!["A"]);

    let (scheduler, _) = scheduler_with_listener();
    scheduler.submit(chain())?;
    let executed = drive(&scheduler, |r| {
        if r.attempt == 1 {
            TaskOutcome::resource_failure("node lost")
        } else {
            TaskOutcome::success(1)
        }
    });
    assert_eq!(executed, vec!["A", "A", "B", "B"]);
    Ok(())
}

#[test]
fn killed_task_is_never_retried() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("killed")
            .with_task(task("A").executions(3).failure_executions(3))
            .build(),
    )?;
    let executed = drive(&scheduler, |_| TaskOutcome::Killed);
    assert_eq!(executed, vec!["A"]);
    assert_eq!(task_state(&scheduler, &job, "A")?, TaskState::Faulty);
    Ok(())
}

#[test]
fn cancel_on_error_cancels_on_user_errors() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("strict")
            .cancel_job_on_error(true)
            .with_task(task("A"))
            .with_task(task("B"))
            .with_task(task("C").after("A"))
            .build(),
    )?;
    let started = scheduler.schedule();
    assert_eq!(started.len(), 2);

    let a = task_id(&job, "A");
    let step = scheduler.on_task_terminal(&a, TaskOutcome::user_exception("boom"))?;
    assert_eq!(step.status, JobStatus::Cancelled);
    assert_eq!(step.newly_skipped, vec![task_id(&job, "C")]);
    assert_eq!(task_state(&scheduler, &job, "B")?, TaskState::Aborted);
    assert!(listener.events().contains(&SchedulerEvent::JobCancelled {
        job: job.clone(),
        cause: Some(a),
    }));

    let late = scheduler.on_task_terminal(&task_id(&job, "B"), TaskOutcome::success(1))?;
    assert!(late.ignored);
    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.exceptions, vec!["A", "B"]);
    Ok(())
}

#[test]
fn cancel_on_error_fails_on_resource_failures() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("strict")
            .cancel_job_on_error(true)
            .with_task(task("A").failure_executions(1))
            .with_task(task("B").after("A"))
            .build(),
    )?;
    drive(&scheduler, |_| TaskOutcome::resource_failure("disk full"));
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Failed);
    Ok(())
}

#[test]
fn outcome_for_a_task_that_is_not_running_is_refused() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let err = scheduler
        .on_task_terminal(&task_id(&job, "B"), TaskOutcome::success(1))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Pending);
    let flagged = scheduler.inspect(&job, |j| j.needs_inspection().map(str::to_string))?;
    assert!(flagged.is_some_and(|reason| reason.contains("'B'")));
    assert_eq!(listener.count("job_needs_inspection"), 1);

    // An unknown id is the caller's mistake, not a defect of the job.
    let err = scheduler
        .on_task_terminal(&task_id(&job, "nope"), TaskOutcome::success(1))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownTask(_)));
    assert_eq!(listener.count("job_needs_inspection"), 1);
    Ok(())
}

#[test]
fn second_completion_of_a_finished_task_flags_the_job() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let a = task_id(&job, "A");
    scheduler.schedule();
    scheduler.on_task_terminal(&a, TaskOutcome::success(1))?;

    let err = scheduler.on_task_terminal(&a, TaskOutcome::success(2)).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));
    assert!(scheduler.inspect(&job, |j| j.needs_inspection().is_some())?);
    assert_eq!(listener.count("job_needs_inspection"), 1);

    // The job itself carries on.
    assert_eq!(drive_with_successes(&scheduler), vec!["B"]);
    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.payload("A"), Some(&serde_json::json!(1)));
    Ok(())
}

#[test]
fn killing_a_running_task_skips_its_dependents() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let a = task_id(&job, "A");
    scheduler.schedule();

    let step = scheduler.kill_task(&a)?;
    assert_eq!(step.final_state, Some(TaskState::Faulty));
    assert_eq!(step.newly_skipped, vec![task_id(&job, "B")]);
    assert_eq!(step.status, JobStatus::Finished);

    let result = scheduler.job_result(&job)?.expect("terminal job has a result");
    assert_eq!(result.exceptions, vec!["A"]);
    assert_eq!(result.skipped, vec!["B"]);

    // The killed run may still report; that is expected, not a defect.
    let late = scheduler.on_task_terminal(&a, TaskOutcome::Killed)?;
    assert!(late.ignored);
    assert_eq!(listener.count("job_needs_inspection"), 0);
    Ok(())
}

#[test]
fn killing_a_pending_task_keeps_the_rest_of_the_job() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("wide")
            .with_task(task("A"))
            .with_task(task("B"))
            .with_task(task("C").after("B"))
            .build(),
    )?;
    let b = task_id(&job, "B");

    let step = scheduler.kill_task(&b)?;
    assert_eq!(step.final_state, Some(TaskState::Faulty));
    assert_eq!(step.newly_skipped, vec![task_id(&job, "C")]);
    assert_eq!(listener.count("task_in_error"), 1);
    assert_eq!(listener.count("task_running_to_finished"), 0);

    assert_eq!(drive_with_successes(&scheduler), vec!["A"]);
    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.exceptions, vec!["B"]);
    assert_eq!(result.results["B"].attempts, 0);
    assert_eq!(result.skipped, vec!["C"]);
    Ok(())
}

#[test]
fn killing_a_task_cancels_a_strict_job() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("strict")
            .cancel_job_on_error(true)
            .with_task(task("A"))
            .with_task(task("B"))
            .build(),
    )?;
    scheduler.schedule();
    let step = scheduler.kill_task(&task_id(&job, "A"))?;
    assert_eq!(step.status, JobStatus::Cancelled);
    assert_eq!(task_state(&scheduler, &job, "B")?, TaskState::Aborted);
    Ok(())
}

#[test]
fn restart_spends_an_execution_each_time() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("restart")
            .with_task(task("A").executions(2))
            .with_task(task("B").after("A"))
            .build(),
    )?;
    let a = task_id(&job, "A");

    scheduler.schedule();
    let step = scheduler.restart_task(&a)?;
    assert!(step.restarted);
    assert_eq!(task_state(&scheduler, &job, "A")?, TaskState::Pending);
    assert_eq!(listener.count("task_waiting_for_restart"), 1);

    let again = scheduler.schedule();
    assert_eq!(again[0].attempt, 2);
    let step = scheduler.restart_task(&a)?;
    assert!(!step.restarted);
    assert_eq!(step.final_state, Some(TaskState::Faulty));
    assert_eq!(step.newly_skipped, vec![task_id(&job, "B")]);

    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.results["A"].attempts, 2);
    Ok(())
}

#[test]
fn restart_without_executions_left_cancels_a_strict_job() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("strict")
            .cancel_job_on_error(true)
            .with_task(task("A"))
            .build(),
    )?;
    scheduler.schedule();
    let step = scheduler.restart_task(&task_id(&job, "A"))?;
    assert_eq!(step.status, JobStatus::Cancelled);
    Ok(())
}

#[test]
fn preempt_keeps_the_execution_budget() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(
        JobTemplateBuilder::new("preempt")
            .with_task(task("A").executions(2))
            .build(),
    )?;
    let a = task_id(&job, "A");

    scheduler.schedule();
    let step = scheduler.preempt_task(&a)?;
    assert!(step.restarted);
    assert_eq!(step.status, JobStatus::Stalled);
    assert_eq!(listener.count("task_waiting_for_restart"), 1);
    let left = scheduler.inspect(&job, |j| j.graph().descriptor(&a).map(|n| n.executions_left()))??;
    assert_eq!(left, 2);

    let again = scheduler.schedule();
    assert_eq!(again.len(), 1);
    assert_eq!(scheduler.job_status(&job)?, JobStatus::Running);
    let step = scheduler.on_task_terminal(&a, TaskOutcome::user_exception("boom"))?;
    assert!(step.restarted);
    Ok(())
}

#[test]
fn task_controls_that_do_not_fit_are_ignored() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let b = task_id(&job, "B");

    assert!(scheduler.preempt_task(&b)?.ignored);
    assert!(scheduler.restart_task(&b)?.ignored);
    assert_eq!(task_state(&scheduler, &job, "B")?, TaskState::Pending);

    drive_with_successes(&scheduler);
    assert!(scheduler.kill_task(&b)?.ignored);
    assert_eq!(listener.count("task_in_error"), 0);

    assert!(matches!(
        scheduler.kill_task(&task_id(&job, "nope")),
        Err(SchedulerError::UnknownTask(_))
    ));
    Ok(())
}

#[test]
fn running_jobs_cannot_be_removed() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    assert!(matches!(
        scheduler.remove_job(&job),
        Err(SchedulerError::InvalidState(_))
    ));
    drive_with_successes(&scheduler);
    let result = scheduler.remove_job(&job)?;
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(scheduler.job_count(), 0);
    assert_eq!(listener.count("job_removed"), 1);
    assert!(matches!(
        scheduler.job_status(&job),
        Err(SchedulerError::UnknownJob(_))
    ));
    Ok(())
}

#[test]
fn priority_changes_are_reported_once() -> TestResult {
    let (scheduler, listener) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    scheduler.change_priority(&job, JobPriority::High)?;
    scheduler.change_priority(&job, JobPriority::High)?;
    assert_eq!(listener.count("job_priority_changed"), 1);
    assert_eq!(scheduler.inspect(&job, |j| j.priority())?, JobPriority::High);
    Ok(())
}

#[test]
fn counters_track_task_states() -> TestResult {
    let (scheduler, _) = scheduler_with_listener();
    let job = scheduler.submit(chain())?;
    let counters = scheduler.job_counters(&job)?;
    assert_eq!((counters.total, counters.pending, counters.running, counters.finished), (2, 2, 0, 0));
    scheduler.schedule();
    let counters = scheduler.job_counters(&job)?;
    assert_eq!((counters.pending, counters.running), (1, 1));
    drive_with_successes(&scheduler);
    let counters = scheduler.job_counters(&job)?;
    assert_eq!((counters.total, counters.finished), (2, 2));
    Ok(())
}
