// src/job/descriptor.rs

//! Per-job scheduling view.
//!
//! [`JobDescriptor`] combines the live [`TaskGraph`] with job metadata,
//! drives the job status machine, applies flow actions and records results.
//! It is a plain single-threaded state machine; the scheduler serialises
//! access per job.
//!
//! Events produced by a mutation are buffered and drained by the caller
//! while it still holds the job, which keeps each job's event stream in
//! mutation order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::dag::{
    DispatchRequest, ExecutionBudget, FlowAction, FlowEngine, FlowKind, GraphEdit, GraphStep,
    JobTemplate, TaskGraph, TaskState, TaskSubset, TemplateGraph,
};
use crate::errors::{Result, SchedulerError};
use crate::events::SchedulerEvent;
use crate::ids::{JobId, TaskId};
use crate::job::builder::validate_template;
use crate::job::outcome::TaskOutcome;
use crate::job::result::{JobResult, ResultAggregator, TaskResult};
use crate::job::snapshot::{JobSnapshot, TaskSnapshot};
use crate::job::status::{JobCounters, JobStatus};
use crate::policy::EligibleTask;
use crate::types::{JobPriority, SchedulerSettings};

/// Why a task ended in error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCause {
    User,
    Resource,
    Killed,
}

/// Operator request on one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// End the task `Faulty` without a retry.
    Kill,
    /// Abort the current run and spend one execution on it.
    Restart,
    /// Put the task back to pending; the run does not count.
    Preempt,
}

/// Structured result of handling one task outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStep {
    pub task: TaskId,
    /// Terminal state the task ended in; `None` when it was put back for
    /// another execution or the outcome was ignored.
    pub final_state: Option<TaskState>,
    pub restarted: bool,
    /// Children that became eligible because the task finished.
    pub newly_eligible: Vec<TaskId>,
    /// Graph edit committed for the task's flow action.
    pub flow: Option<GraphStep>,
    /// Reason the attached flow action was rejected.
    pub flow_error: Option<String>,
    /// Tasks that will never run because of this outcome.
    pub newly_skipped: Vec<TaskId>,
    pub status: JobStatus,
    /// Nothing was applied: the job was already terminal, the outcome
    /// belonged to an abandoned run, or the control request did not fit
    /// the task's state.
    pub ignored: bool,
}

impl JobStep {
    fn new(task: TaskId, status: JobStatus) -> Self {
        Self {
            task,
            final_state: None,
            restarted: false,
            newly_eligible: Vec::new(),
            flow: None,
            flow_error: None,
            newly_skipped: Vec::new(),
            status,
            ignored: false,
        }
    }
}

#[derive(Debug)]
pub struct JobDescriptor {
    id: JobId,
    template: JobTemplate,
    templates: Arc<TemplateGraph>,
    graph: TaskGraph,
    budget: ExecutionBudget,
    cancel_job_on_error: bool,
    priority: JobPriority,
    status: JobStatus,
    paused_from: Option<JobStatus>,
    counters: JobCounters,
    results: ResultAggregator,
    needs_inspection: Option<String>,
    /// Runs abandoned by a task control whose outcome may still arrive.
    abandoned: HashMap<TaskId, u32>,
    events: Vec<SchedulerEvent>,
}

impl JobDescriptor {
    pub(crate) fn new(
        id: JobId,
        template: JobTemplate,
        templates: Arc<TemplateGraph>,
        graph: TaskGraph,
        budget: ExecutionBudget,
        cancel_job_on_error: bool,
    ) -> Self {
        let priority = template.priority;
        let mut job = Self {
            id: id.clone(),
            template,
            templates,
            graph,
            budget,
            cancel_job_on_error,
            priority,
            status: JobStatus::Pending,
            paused_from: None,
            counters: JobCounters::default(),
            results: ResultAggregator::new(),
            needs_inspection: None,
            abandoned: HashMap::new(),
            events: Vec::new(),
        };
        job.refresh_counters();
        job.emit(SchedulerEvent::JobSubmitted { job: id });
        job
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn project(&self) -> Option<&str> {
        self.template.project.as_deref()
    }

    pub fn generic_information(&self) -> &BTreeMap<String, String> {
        &self.template.generic_information
    }

    pub fn cancel_job_on_error(&self) -> bool {
        self.cancel_job_on_error
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.status == JobStatus::Paused
    }

    pub fn counters(&self) -> JobCounters {
        self.counters
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn templates(&self) -> &TemplateGraph {
        &self.templates
    }

    pub fn results(&self) -> &ResultAggregator {
        &self.results
    }

    pub fn needs_inspection(&self) -> Option<&str> {
        self.needs_inspection.as_deref()
    }

    /// Tasks the policy may start now. Empty while the job is paused or
    /// once it is terminal.
    pub fn get_eligible_tasks(&self) -> Vec<TaskId> {
        if self.is_paused() || self.status.is_terminal() {
            return Vec::new();
        }
        self.graph.eligible_tasks()
    }

    /// Eligible tasks with the attributes a scheduling policy needs.
    pub fn eligible_snapshot(&self) -> Vec<EligibleTask> {
        self.get_eligible_tasks()
            .into_iter()
            .filter_map(|id| {
                let node = self.graph.get(&id)?;
                Some(EligibleTask {
                    priority: self.priority,
                    resources: node.resources(),
                    sequence: node.sequence(),
                    task: id,
                })
            })
            .collect()
    }

    pub fn subset_of(&self, task: &TaskId) -> Result<TaskSubset> {
        self.graph.subset_of(task, self.is_paused())
    }

    /// Start an eligible task and describe it for the executor.
    pub fn start_task(&mut self, task: &TaskId) -> Result<DispatchRequest> {
        if self.status.is_terminal() || self.is_paused() {
            return Err(SchedulerError::InvalidState(format!(
                "job {} cannot start tasks while {}",
                self.id, self.status
            )));
        }
        self.graph.mark_started(task)?;

        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Running;
                info!(job = %self.id, "job started running");
                self.emit(SchedulerEvent::JobPendingToRunning {
                    job: self.id.clone(),
                });
            }
            JobStatus::Stalled => {
                self.status = JobStatus::Running;
                self.emit(SchedulerEvent::JobStalledToRunning {
                    job: self.id.clone(),
                });
            }
            _ => {}
        }
        self.emit(SchedulerEvent::TaskPendingToRunning { task: task.clone() });
        self.refresh_counters();

        let node = self.graph.descriptor(task)?;
        Ok(DispatchRequest {
            task: task.clone(),
            resources: node.resources(),
            kind: node.template().kind.clone(),
            flow: node.template().flow.clone(),
            attempt: node.attempts(),
        })
    }

    /// Handle the outcome of a running task.
    ///
    /// In order: record the result, apply the flow action, finish the task
    /// in the graph, update counters, emit events, and finish the job once
    /// every live task is terminal.
    pub fn on_task_terminal(&mut self, task: &TaskId, outcome: TaskOutcome) -> Result<JobStep> {
        if task.job() != &self.id {
            return Err(SchedulerError::UnknownTask(task.to_string()));
        }
        if self.status.is_terminal() {
            debug!(
                job = %self.id,
                task = %task,
                status = %self.status,
                "job already terminal; ignoring task outcome"
            );
            let mut step = JobStep::new(task.clone(), self.status);
            step.ignored = true;
            return Ok(step);
        }

        let state = self.graph.descriptor(task)?.state();
        if state != TaskState::Running {
            if self.take_abandoned(task) {
                debug!(job = %self.id, task = %task, "late outcome of an abandoned run ignored");
                let mut step = JobStep::new(task.clone(), self.status);
                step.ignored = true;
                return Ok(step);
            }
            let err = SchedulerError::InvalidState(format!(
                "outcome reported for task '{task}' in state {state:?}"
            ));
            self.flag_inspection(err.to_string());
            return Err(err);
        }

        let mut step = JobStep::new(task.clone(), self.status);
        let handled = match outcome {
            TaskOutcome::Success { payload, flow } => {
                self.complete_success(task, payload, flow, &mut step)
            }
            TaskOutcome::UserException { payload } => {
                let message = exception_message(&payload);
                self.complete_error(task, ErrorCause::User, message, payload, &mut step)
            }
            TaskOutcome::ResourceFailure { reason } => {
                let payload = json!({ "reason": reason });
                self.complete_error(task, ErrorCause::Resource, reason, payload, &mut step)
            }
            TaskOutcome::Killed => self.complete_error(
                task,
                ErrorCause::Killed,
                "task was killed".to_string(),
                Value::Null,
                &mut step,
            ),
        };

        // The graph may be half-updated here; the job cannot go on.
        if let Err(err) = handled {
            self.fail_on_defect(format!("handling outcome of task '{task}' failed: {err}"));
            return Err(err);
        }

        self.refresh(&mut step);
        Ok(step)
    }

    fn complete_success(
        &mut self,
        task: &TaskId,
        payload: Value,
        flow: Option<FlowAction>,
        step: &mut JobStep,
    ) -> Result<()> {
        let (precious, attempts, declared) = {
            let node = self.graph.descriptor(task)?;
            (
                node.template().precious_result,
                node.attempts(),
                node.template().flow.clone(),
            )
        };

        let result = TaskResult::value(task.clone(), payload, precious, attempts);
        if let Err(err) = self.results.record_result(task.readable_name(), result) {
            self.flag_inspection(err.to_string());
        }

        let fallback = FlowAction::fallback_for(declared.as_ref());
        let action = match flow {
            None | Some(FlowAction::Continue) => fallback.clone(),
            Some(action) => action,
        };

        let edit = match self.plan(task, &action) {
            Ok(edit) => Some(edit),
            Err(err) => {
                if err.is_defect() {
                    self.flag_inspection(format!("planning flow for task '{task}' failed: {err}"));
                }
                let reason = err.to_string();
                warn!(job = %self.id, task = %task, %reason, "flow action rejected");
                self.emit(SchedulerEvent::TaskFlowError {
                    task: task.clone(),
                    reason: reason.clone(),
                });
                step.flow_error = Some(reason);
                if fallback == action {
                    None
                } else {
                    match self.plan(task, &fallback) {
                        Ok(edit) => Some(edit),
                        Err(err) => {
                            self.flag_inspection(format!(
                                "fallback flow for task '{task}' failed: {err}"
                            ));
                            None
                        }
                    }
                }
            }
        };

        if let Some(edit) = edit {
            let applied = edit.apply(&mut self.graph);
            self.emit_flow_events(task, &applied);
            if !applied.pruned.is_empty() {
                self.results.record_skipped(applied.pruned.iter().cloned());
            }
            step.flow = Some(applied);
        }

        step.newly_eligible = self.graph.mark_finished(task, TaskState::Finished)?;
        step.final_state = Some(TaskState::Finished);
        self.emit(SchedulerEvent::TaskRunningToFinished {
            task: task.clone(),
            state: TaskState::Finished,
        });
        debug!(
            job = %self.id,
            task = %task,
            eligible = step.newly_eligible.len(),
            "task finished"
        );
        Ok(())
    }

    fn complete_error(
        &mut self,
        task: &TaskId,
        cause: ErrorCause,
        message: String,
        payload: Value,
        step: &mut JobStep,
    ) -> Result<()> {
        let (may_retry, attempts) = {
            let node = self.graph.descriptor_mut(task)?;
            let may_retry = match cause {
                ErrorCause::User => node.consume_execution(),
                ErrorCause::Resource => node.consume_failure_execution(),
                ErrorCause::Killed => false,
            };
            (may_retry, node.attempts())
        };

        if may_retry {
            self.graph.mark_restart(task)?;
            info!(
                job = %self.id,
                task = %task,
                attempts,
                %message,
                "task failed; waiting for restart"
            );
            self.emit(SchedulerEvent::TaskWaitingForRestart {
                task: task.clone(),
                attempts,
            });
            step.restarted = true;
            return Ok(());
        }

        self.fail_task(task, cause, message, payload, step)
    }

    /// End a live task `Faulty`, then apply the job's error policy.
    fn fail_task(
        &mut self,
        task: &TaskId,
        cause: ErrorCause,
        message: String,
        payload: Value,
        step: &mut JobStep,
    ) -> Result<()> {
        let (state, precious, attempts) = {
            let node = self.graph.descriptor(task)?;
            (node.state(), node.template().precious_result, node.attempts())
        };
        if state == TaskState::Running {
            self.graph.mark_finished(task, TaskState::Faulty)?;
        } else {
            self.graph.force_terminal(task, TaskState::Faulty);
        }
        step.final_state = Some(TaskState::Faulty);
        let result = TaskResult::exception(task.clone(), message.clone(), payload, precious, attempts);
        if let Err(err) = self.results.record_result(task.readable_name(), result) {
            self.flag_inspection(err.to_string());
        }
        warn!(job = %self.id, task = %task, %message, "task is faulty");
        self.emit(SchedulerEvent::TaskInError {
            task: task.clone(),
            message,
        });
        if state == TaskState::Running {
            self.emit(SchedulerEvent::TaskRunningToFinished {
                task: task.clone(),
                state: TaskState::Faulty,
            });
        }

        if self.cancel_job_on_error {
            let status = match cause {
                ErrorCause::Resource => JobStatus::Failed,
                ErrorCause::User | ErrorCause::Killed => JobStatus::Cancelled,
            };
            step.newly_skipped = self.terminate(status, Some(task.clone()));
        } else {
            let skipped = self.mark_dependents_not_started(task);
            if !skipped.is_empty() {
                self.results.record_skipped(skipped.iter().cloned());
                self.emit(SchedulerEvent::TaskSkipped {
                    initiator: task.clone(),
                    skipped: skipped.clone(),
                });
            }
            step.newly_skipped = skipped;
        }
        Ok(())
    }

    fn plan(&self, task: &TaskId, action: &FlowAction) -> Result<GraphEdit> {
        FlowEngine::new(&self.graph, &self.templates, self.budget).plan(task, action)
    }

    fn emit_flow_events(&mut self, initiator: &TaskId, applied: &GraphStep) {
        match applied.kind {
            FlowKind::Loop | FlowKind::Replicate if !applied.created.is_empty() => {
                self.emit(SchedulerEvent::TaskReplicated {
                    initiator: initiator.clone(),
                    created: applied.created.clone(),
                });
            }
            FlowKind::If if !applied.pruned.is_empty() => {
                self.emit(SchedulerEvent::TaskSkipped {
                    initiator: initiator.clone(),
                    skipped: applied.pruned.clone(),
                });
            }
            _ => {}
        }
    }

    /// Mark every pending task below `failed` as never to start.
    ///
    /// Returns the newly skipped tasks.
    fn mark_dependents_not_started(&mut self, failed: &TaskId) -> Vec<TaskId> {
        let mut stack: Vec<TaskId> = match self.graph.get(failed) {
            Some(node) => node.children().to_vec(),
            None => return Vec::new(),
        };
        let mut newly_skipped = Vec::new();

        while let Some(id) = stack.pop() {
            let Some(node) = self.graph.get(&id) else {
                continue;
            };
            if node.state() != TaskState::Pending {
                continue;
            }
            let children = node.children().to_vec();
            if self.graph.mark_not_started(&id).is_ok() {
                debug!(
                    job = %self.id,
                    task = %id,
                    "marking dependent as not started due to upstream failure"
                );
                newly_skipped.push(id);
                stack.extend(children);
            }
        }
        newly_skipped
    }

    /// End the job in `status`: running tasks are aborted, pending ones
    /// will never start. Returns the tasks that were skipped.
    fn terminate(&mut self, status: JobStatus, cause: Option<TaskId>) -> Vec<TaskId> {
        for id in self.graph.running_tasks() {
            let (precious, attempts) = match self.graph.get(&id) {
                Some(node) => (node.template().precious_result, node.attempts()),
                None => continue,
            };
            self.graph.force_terminal(&id, TaskState::Aborted);
            let result = TaskResult::exception(
                id.clone(),
                format!("aborted: job {status}"),
                Value::Null,
                precious,
                attempts,
            );
            if let Err(err) = self.results.record_result(id.readable_name(), result) {
                self.flag_inspection(err.to_string());
            }
            self.emit(SchedulerEvent::TaskRunningToFinished {
                task: id,
                state: TaskState::Aborted,
            });
        }

        let skipped = self.graph.ids_in_state(TaskState::Pending);
        for id in &skipped {
            self.graph.force_terminal(id, TaskState::NotStarted);
        }
        self.results.record_skipped(skipped.iter().cloned());

        self.status = status;
        self.paused_from = None;
        self.refresh_counters();
        info!(job = %self.id, status = %status, skipped = skipped.len(), "job terminated");

        let job = self.id.clone();
        let event = match status {
            JobStatus::Cancelled => SchedulerEvent::JobCancelled { job, cause },
            JobStatus::Failed => SchedulerEvent::JobFailed { job, cause },
            _ => SchedulerEvent::JobKilled { job },
        };
        self.emit(event);
        skipped
    }

    /// Apply an operator request to one task instance.
    ///
    /// - `Kill` works on pending and running tasks: the task ends `Faulty`
    ///   without a retry and the job's error policy applies, as for a
    ///   `Killed` outcome.
    /// - `Restart` aborts a running task and spends one execution, as a
    ///   user exception would: it runs again while executions remain.
    /// - `Preempt` puts a running task back to pending with its budget
    ///   untouched.
    ///
    /// Requests that do not fit the task's state are ignored. A running
    /// task's executor may still report the abandoned run; that outcome is
    /// dropped.
    pub fn control_task(&mut self, task: &TaskId, control: TaskControl) -> Result<JobStep> {
        if task.job() != &self.id {
            return Err(SchedulerError::UnknownTask(task.to_string()));
        }
        let state = self.graph.descriptor(task)?.state();
        let mut step = JobStep::new(task.clone(), self.status);
        let applicable = match control {
            TaskControl::Kill => !state.is_terminal(),
            TaskControl::Restart | TaskControl::Preempt => state == TaskState::Running,
        };
        if self.status.is_terminal() || !applicable {
            info!(
                job = %self.id,
                task = %task,
                ?control,
                ?state,
                "task control does not apply; ignored"
            );
            step.ignored = true;
            return Ok(step);
        }

        if state == TaskState::Running {
            *self.abandoned.entry(task.clone()).or_insert(0) += 1;
        }
        info!(job = %self.id, task = %task, ?control, "task control applied");
        let handled = match control {
            TaskControl::Kill => self.fail_task(
                task,
                ErrorCause::Killed,
                "task was killed by an operator".to_string(),
                Value::Null,
                &mut step,
            ),
            TaskControl::Restart => self.complete_error(
                task,
                ErrorCause::User,
                "task was restarted by an operator".to_string(),
                Value::Null,
                &mut step,
            ),
            TaskControl::Preempt => self.preempt(task, &mut step),
        };

        if let Err(err) = handled {
            self.fail_on_defect(format!("{control:?} of task '{task}' failed: {err}"));
            return Err(err);
        }
        self.refresh(&mut step);
        Ok(step)
    }

    pub fn kill_task(&mut self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Kill)
    }

    pub fn restart_task(&mut self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Restart)
    }

    pub fn preempt_task(&mut self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Preempt)
    }

    fn preempt(&mut self, task: &TaskId, step: &mut JobStep) -> Result<()> {
        self.graph.mark_restart(task)?;
        let attempts = self.graph.descriptor(task)?.attempts();
        self.emit(SchedulerEvent::TaskWaitingForRestart {
            task: task.clone(),
            attempts,
        });
        step.restarted = true;
        Ok(())
    }

    fn take_abandoned(&mut self, task: &TaskId) -> bool {
        let Some(count) = self.abandoned.get_mut(task) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.abandoned.remove(task);
        }
        true
    }

    /// Kill the job. Returns `false` when it was already terminal.
    pub fn kill(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.terminate(JobStatus::Killed, None);
        true
    }

    /// End the job as `Failed` after an internal error it cannot recover
    /// from. Returns `false` when it was already terminal.
    pub(crate) fn fail_on_defect(&mut self, reason: impl Into<String>) -> bool {
        self.flag_inspection(reason);
        if self.status.is_terminal() {
            return false;
        }
        self.terminate(JobStatus::Failed, None);
        true
    }

    /// Pause the job. Running tasks keep running; nothing new starts.
    ///
    /// Returns `false` when already paused.
    pub fn pause(&mut self) -> Result<bool> {
        if self.is_paused() {
            return Ok(false);
        }
        if !self.status.can_pause() {
            return Err(SchedulerError::InvalidState(format!(
                "job {} cannot be paused while {}",
                self.id, self.status
            )));
        }
        self.paused_from = Some(self.status);
        self.status = JobStatus::Paused;
        info!(job = %self.id, "job paused");
        self.emit(SchedulerEvent::JobPaused {
            job: self.id.clone(),
        });
        Ok(true)
    }

    /// Resume a paused job into the state it left. Returns `false` when the
    /// job was not paused.
    pub fn resume(&mut self) -> bool {
        if !self.is_paused() {
            return false;
        }
        let back = match self.paused_from.take() {
            Some(JobStatus::Running) if self.counters.running == 0 => JobStatus::Stalled,
            Some(previous) => previous,
            None => JobStatus::Pending,
        };
        self.status = back;
        info!(job = %self.id, status = %back, "job resumed");
        self.emit(SchedulerEvent::JobResumed {
            job: self.id.clone(),
            status: back,
        });
        true
    }

    pub fn change_priority(&mut self, priority: JobPriority) {
        if self.priority == priority {
            return;
        }
        self.priority = priority;
        self.emit(SchedulerEvent::JobPriorityChanged {
            job: self.id.clone(),
            priority,
        });
    }

    /// Record an internal consistency problem. The job keeps its state but
    /// is reported for manual inspection.
    pub fn flag_inspection(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(job = %self.id, %reason, "job flagged for inspection");
        self.needs_inspection = Some(reason.clone());
        self.emit(SchedulerEvent::JobNeedsInspection {
            job: self.id.clone(),
            reason,
        });
    }

    /// Composed result, once the job is terminal.
    pub fn result(&self) -> Option<JobResult> {
        self.status
            .is_terminal()
            .then(|| JobResult::compose(self.id.clone(), self.status, &self.results))
    }

    pub(crate) fn record_removal(&mut self) {
        self.emit(SchedulerEvent::JobRemoved {
            job: self.id.clone(),
        });
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: SchedulerEvent) {
        self.events.push(event);
    }

    fn refresh(&mut self, step: &mut JobStep) {
        self.refresh_counters();

        if !self.status.is_terminal() && self.graph.all_terminal() {
            self.status = JobStatus::Finished;
            self.paused_from = None;
            info!(job = %self.id, results = self.results.len(), "job finished");
            self.emit(SchedulerEvent::JobFinished {
                job: self.id.clone(),
            });
        } else if self.counters.running == 0 {
            match self.status {
                JobStatus::Running => {
                    self.status = JobStatus::Stalled;
                    self.emit(SchedulerEvent::JobRunningToStalled {
                        job: self.id.clone(),
                    });
                }
                JobStatus::Paused if self.paused_from == Some(JobStatus::Running) => {
                    self.paused_from = Some(JobStatus::Stalled);
                }
                _ => {}
            }
        }
        step.status = self.status;
    }

    fn refresh_counters(&mut self) {
        let retired = self.graph.retired_count();
        self.counters = JobCounters {
            total: self.graph.len() + retired,
            pending: self.graph.count_in_state(TaskState::Pending),
            running: self.graph.count_in_state(TaskState::Running),
            finished: self.graph.tasks().filter(|n| n.state().is_terminal()).count() + retired,
        };
    }

    /// Persistable image of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.id.clone(),
            template: self.template.clone(),
            priority: self.priority,
            status: self.status,
            paused_from: self.paused_from,
            cancel_job_on_error: self.cancel_job_on_error,
            tasks: self
                .graph
                .tasks()
                .map(|n| TaskSnapshot {
                    id: n.id().clone(),
                    parents: n.parents().to_vec(),
                    state: if n.is_awaiting_restore() {
                        TaskState::Running
                    } else {
                        n.state()
                    },
                    attempts: n.attempts(),
                    executions_left: n.executions_left(),
                    failure_executions_left: n.failure_executions_left(),
                })
                .collect(),
            retired: self.graph.retired().cloned().collect(),
            results: self
                .results
                .get_all_results()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            skipped: self.results.skipped().to_vec(),
        }
    }

    /// Rebuild a job from a snapshot.
    ///
    /// Tasks that were running are held back (neither eligible nor running)
    /// until [`JobDescriptor::restore_running_tasks`] is called.
    pub fn from_snapshot(snapshot: JobSnapshot, settings: &SchedulerSettings) -> Result<Self> {
        let templates = validate_template(&snapshot.template)?;
        let budget = ExecutionBudget {
            max_number_of_execution: settings.max_number_of_execution,
            max_number_of_execution_on_failure: settings.max_number_of_execution_on_failure,
        };

        let mut graph = TaskGraph::new();
        for id in &snapshot.retired {
            graph.reserve_retired(id.clone());
        }
        for task in &snapshot.tasks {
            if task.id.job() != &snapshot.job {
                return Err(SchedulerError::InvalidState(format!(
                    "task '{}' in snapshot of job {} belongs to job {}",
                    task.id,
                    snapshot.job,
                    task.id.job()
                )));
            }
            let template = templates
                .get(task.id.name())
                .ok_or_else(|| SchedulerError::UnknownTask(task.id.to_string()))?;
            let mut node = budget.descriptor(task.id.clone(), Arc::clone(template));
            node.set_counters(task.attempts, task.executions_left, task.failure_executions_left);
            if task.state == TaskState::Running {
                node.set_awaiting_restore(true);
            } else {
                node.set_state(task.state);
            }
            if graph.is_reserved(&task.id) {
                return Err(SchedulerError::Graph(format!(
                    "duplicate task id '{}' in snapshot",
                    task.id
                )));
            }
            graph.insert_node(node);
        }
        for task in &snapshot.tasks {
            for parent in &task.parents {
                if !graph.contains(parent) {
                    return Err(SchedulerError::UnknownTask(parent.to_string()));
                }
                graph.link(parent, &task.id);
            }
        }

        let mut results = ResultAggregator::new();
        for (name, result) in snapshot.results {
            results.record_result(name, result)?;
        }
        results.record_skipped(snapshot.skipped);

        let mut job = Self {
            id: snapshot.job,
            template: snapshot.template,
            templates: Arc::new(templates),
            graph,
            budget,
            cancel_job_on_error: snapshot.cancel_job_on_error,
            priority: snapshot.priority,
            status: snapshot.status,
            paused_from: snapshot.paused_from,
            counters: JobCounters::default(),
            results,
            needs_inspection: None,
            abandoned: HashMap::new(),
            events: Vec::new(),
        };
        job.refresh_counters();
        Ok(job)
    }

    /// Re-mark the tasks that were running when the snapshot was taken.
    ///
    /// Only in-memory bookkeeping: the executors still have to be
    /// reconciled separately.
    pub fn restore_running_tasks(&mut self) -> Vec<TaskId> {
        let restored: Vec<TaskId> = self
            .graph
            .tasks()
            .filter(|n| n.is_awaiting_restore())
            .map(|n| n.id().clone())
            .collect();
        for id in &restored {
            if let Ok(node) = self.graph.descriptor_mut(id) {
                node.set_awaiting_restore(false);
                node.set_state(TaskState::Running);
            }
        }
        self.refresh_counters();
        if !restored.is_empty() {
            info!(job = %self.id, tasks = restored.len(), "running tasks restored");
        }
        restored
    }
}

fn exception_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        Value::Null => "task raised an exception".to_string(),
        other => other.to_string(),
    }
}
