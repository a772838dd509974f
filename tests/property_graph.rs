// tests/property_graph.rs

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use flowsched::dag::{JobTemplate, TaskState};
use flowsched::ids::JobId;
use flowsched::job::{JobStatus, TaskOutcome, build_job_graph};
use flowsched::types::SchedulerSettings;
use flowsched_test_utils::{JobTemplateBuilder, drive_job, task};

// Strategy to generate a valid DAG template.
// Acyclicity is guaranteed by only letting task N depend on tasks 0..N-1.
fn dag_template_strategy(max_tasks: usize) -> impl Strategy<Value = (JobTemplate, Vec<bool>)> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        );
        let failing = proptest::collection::vec(any::<bool>(), num_tasks);
        (deps, failing).prop_map(move |(raw_deps, failing)| {
            let mut builder = JobTemplateBuilder::new("prop");
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let mut t = task(&format!("t{i}"));
                let valid: BTreeSet<usize> = if i == 0 {
                    BTreeSet::new()
                } else {
                    potential.into_iter().map(|d| d % i).collect()
                };
                for dep in valid {
                    t = t.after(&format!("t{dep}"));
                }
                builder = builder.with_task(t);
            }
            (builder.build(), failing)
        })
    })
}

proptest! {
    #[test]
    fn initially_eligible_tasks_are_the_roots((template, _) in dag_template_strategy(12)) {
        let roots: BTreeSet<String> = template
            .tasks
            .iter()
            .filter(|t| t.dependencies.is_empty())
            .map(|t| t.name.clone())
            .collect();
        let job = build_job_graph(JobId::new(1, "prop"), template, &SchedulerSettings::default())
            .unwrap();
        let eligible: BTreeSet<String> = job
            .get_eligible_tasks()
            .iter()
            .map(|t| t.readable_name())
            .collect();
        prop_assert_eq!(eligible, roots);
        prop_assert!(job.graph().check_invariants().is_ok());
    }

    #[test]
    fn every_task_ends_with_a_result_or_a_skip((template, failing) in dag_template_strategy(12)) {
        let size = template.tasks.len();
        let mut job = build_job_graph(JobId::new(1, "prop"), template, &SchedulerSettings::default())
            .unwrap();

        let executed = drive_job(&mut job, |r| {
            let index: usize = r.task.name()[1..].parse().unwrap();
            if failing[index] {
                TaskOutcome::user_exception("planned failure")
            } else {
                TaskOutcome::success(index)
            }
        });

        // No task runs twice with the default budget.
        let unique: HashSet<&String> = executed.iter().collect();
        prop_assert_eq!(unique.len(), executed.len());

        prop_assert_eq!(job.status(), JobStatus::Finished);
        prop_assert!(job.graph().all_terminal());
        prop_assert!(job.graph().check_invariants().is_ok());

        let counters = job.counters();
        prop_assert_eq!(counters.total, size);
        prop_assert_eq!(counters.finished, size);
        prop_assert_eq!(job.results().len() + job.results().skipped_count(), size);
        prop_assert_eq!(job.results().len(), executed.len());
        prop_assert_eq!(
            job.graph().count_in_state(TaskState::NotStarted),
            job.results().skipped_count()
        );
    }
}
