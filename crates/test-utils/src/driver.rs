#![allow(dead_code)]

use flowsched::dag::DispatchRequest;
use flowsched::engine::Scheduler;
use flowsched::ids::{JobId, TaskId};
use flowsched::job::{JobDescriptor, TaskOutcome};

const MAX_ROUNDS: usize = 1_000;

/// Run scheduling rounds synchronously until nothing is eligible, deciding
/// each dispatched task's outcome with `decide`.
///
/// Returns the readable names of every dispatched task, in dispatch order.
/// Panics when an outcome is refused or the job never settles.
pub fn drive<F>(scheduler: &Scheduler, mut decide: F) -> Vec<String>
where
    F: FnMut(&DispatchRequest) -> TaskOutcome,
{
    let mut executed = Vec::new();
    for _ in 0..MAX_ROUNDS {
        let batch = scheduler.schedule();
        if batch.is_empty() {
            return executed;
        }
        for request in batch {
            executed.push(request.task.readable_name());
            let outcome = decide(&request);
            scheduler
                .on_task_terminal(&request.task, outcome)
                .unwrap_or_else(|e| panic!("outcome for {} refused: {e}", request.task));
        }
    }
    panic!("scheduler still dispatching after {MAX_ROUNDS} rounds");
}

/// [`drive`] where every task succeeds without a flow decision.
pub fn drive_with_successes(scheduler: &Scheduler) -> Vec<String> {
    drive(scheduler, |r| TaskOutcome::success(r.task.readable_name()))
}

/// Same as [`drive`], against a single job without going through a
/// scheduler.
pub fn drive_job<F>(job: &mut JobDescriptor, mut decide: F) -> Vec<String>
where
    F: FnMut(&DispatchRequest) -> TaskOutcome,
{
    let mut executed = Vec::new();
    for _ in 0..MAX_ROUNDS {
        let eligible = job.get_eligible_tasks();
        if eligible.is_empty() {
            return executed;
        }
        let mut batch = Vec::new();
        for id in eligible {
            batch.push(
                job.start_task(&id)
                    .unwrap_or_else(|e| panic!("could not start {id}: {e}")),
            );
        }
        for request in batch {
            executed.push(request.task.readable_name());
            let outcome = decide(&request);
            job.on_task_terminal(&request.task, outcome)
                .unwrap_or_else(|e| panic!("outcome for {} refused: {e}", request.task));
        }
    }
    panic!("job still dispatching after {MAX_ROUNDS} rounds");
}

/// Task id from a readable name such as `T1#2*1`.
pub fn task_id(job: &JobId, readable: &str) -> TaskId {
    let (name, iteration, replication) = TaskId::parse_readable(readable)
        .unwrap_or_else(|| panic!("not a readable task name: {readable}"));
    TaskId::with_indices(job.clone(), name, iteration, replication)
}
