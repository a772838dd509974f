// src/engine/registry.rs

//! Thread-safe registry of jobs.
//!
//! Each job sits behind its own mutex inside a `DashMap`, so completions
//! for different jobs proceed in parallel while mutations of one job are
//! serialised. The map entry is never held while a job is locked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::dag::{DispatchRequest, JobTemplate};
use crate::errors::{Result, SchedulerError};
use crate::events::{ListenerSet, SchedulerListener};
use crate::ids::{JobId, JobIdGenerator, TaskId};
use crate::job::{
    JobCounters, JobDescriptor, JobResult, JobSnapshot, JobStatus, JobStep, TaskControl,
    TaskOutcome, build_job_graph,
};
use crate::policy::{EligibleTask, SchedulingPolicy, policy_for};
use crate::types::{JobPriority, SchedulerSettings};

#[derive(Debug)]
struct JobHandle {
    descriptor: Mutex<JobDescriptor>,
}

impl JobHandle {
    fn new(descriptor: JobDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Mutex::new(descriptor),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, JobDescriptor>> {
        self.descriptor
            .lock()
            .map_err(|_| SchedulerError::InvalidState("job lock poisoned".to_string()))
    }
}

pub struct Scheduler {
    jobs: DashMap<JobId, Arc<JobHandle>>,
    ids: JobIdGenerator,
    policy: RwLock<Arc<dyn SchedulingPolicy>>,
    listeners: ListenerSet,
    settings: SchedulerSettings,
    /// Set while snapshots are loaded and running tasks not yet restored.
    recovering: AtomicBool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs.len())
            .field("policy", &self.policy_name())
            .field("listeners", &self.listeners)
            .field("recovering", &self.is_recovering())
            .finish()
    }
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            jobs: DashMap::new(),
            ids: JobIdGenerator::new(),
            policy: RwLock::new(policy_for(settings.policy)),
            listeners: ListenerSet::new(),
            settings,
            recovering: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn add_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.listeners.add(listener);
    }

    /// Swap the scheduling policy. Job state is untouched.
    pub fn set_policy(&self, policy: Arc<dyn SchedulingPolicy>) {
        info!(policy = policy.name(), "scheduling policy changed");
        match self.policy.write() {
            Ok(mut guard) => *guard = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.current_policy().name()
    }

    fn current_policy(&self) -> Arc<dyn SchedulingPolicy> {
        match self.policy.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate `template`, build its graph and register the job.
    pub fn submit(&self, template: JobTemplate) -> Result<JobId> {
        let id = self.ids.next_id(template.name.clone());
        let descriptor = build_job_graph(id.clone(), template, &self.settings)?;
        info!(job = %id, tasks = descriptor.graph().len(), "job submitted");
        let handle = JobHandle::new(descriptor);
        self.jobs.insert(id.clone(), Arc::clone(&handle));
        self.publish(&handle)?;
        Ok(id)
    }

    fn handle(&self, job: &JobId) -> Result<Arc<JobHandle>> {
        self.jobs
            .get(job)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SchedulerError::UnknownJob(job.clone()))
    }

    fn handles(&self) -> Vec<Arc<JobHandle>> {
        self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn publish(&self, handle: &JobHandle) -> Result<()> {
        let mut job = handle.lock()?;
        let events = job.drain_events();
        self.listeners.notify(&events);
        Ok(())
    }

    /// Run `f` on the locked job, then deliver the events it produced
    /// before releasing the lock.
    fn with_job<R>(
        &self,
        job: &JobId,
        f: impl FnOnce(&mut JobDescriptor) -> Result<R>,
    ) -> Result<R> {
        let handle = self.handle(job)?;
        let mut descriptor = handle.lock()?;
        let out = f(&mut descriptor);
        let events = descriptor.drain_events();
        self.listeners.notify(&events);
        out
    }

    /// Read-only access to one job.
    pub fn inspect<R>(&self, job: &JobId, f: impl FnOnce(&JobDescriptor) -> R) -> Result<R> {
        let handle = self.handle(job)?;
        let descriptor = handle.lock()?;
        Ok(f(&descriptor))
    }

    /// Eligible tasks of every job, unordered.
    pub fn eligible_tasks(&self) -> Vec<EligibleTask> {
        let mut eligible = Vec::new();
        for handle in self.handles() {
            match handle.lock() {
                Ok(job) => eligible.extend(job.eligible_snapshot()),
                Err(err) => warn!(error = %err, "skipping job while collecting eligible tasks"),
            }
        }
        eligible
    }

    /// One scheduling round: order the eligible tasks with the current
    /// policy and start them.
    pub fn schedule(&self) -> Vec<DispatchRequest> {
        let policy = self.current_policy();
        let ordered = policy.order(self.eligible_tasks());
        let mut dispatched = Vec::with_capacity(ordered.len());
        for candidate in ordered {
            let job = candidate.task.job().clone();
            match self.with_job(&job, |j| j.start_task(&candidate.task)) {
                Ok(request) => dispatched.push(request),
                // Raced with a completion, kill or pause since the snapshot.
                Err(err) => debug!(task = %candidate.task, error = %err, "task not started"),
            }
        }
        if !dispatched.is_empty() {
            debug!(policy = policy.name(), count = dispatched.len(), "scheduling round");
        }
        dispatched
    }

    /// Report the outcome of a running task.
    ///
    /// Refused with `NotReady` between [`Scheduler::recover`] and
    /// [`Scheduler::restore_running_tasks`].
    pub fn on_task_terminal(&self, task: &TaskId, outcome: TaskOutcome) -> Result<JobStep> {
        if self.is_recovering() {
            return Err(SchedulerError::NotReady);
        }
        self.with_job(task.job(), |job| job.on_task_terminal(task, outcome))
    }

    /// Apply an operator request to one task; see
    /// [`JobDescriptor::control_task`].
    pub fn control_task(&self, task: &TaskId, control: TaskControl) -> Result<JobStep> {
        self.with_job(task.job(), |job| job.control_task(task, control))
    }

    pub fn kill_task(&self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Kill)
    }

    pub fn restart_task(&self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Restart)
    }

    pub fn preempt_task(&self, task: &TaskId) -> Result<JobStep> {
        self.control_task(task, TaskControl::Preempt)
    }

    pub fn kill_job(&self, job: &JobId) -> Result<bool> {
        self.with_job(job, |j| Ok(j.kill()))
    }

    pub fn pause_job(&self, job: &JobId) -> Result<bool> {
        self.with_job(job, |j| j.pause())
    }

    pub fn resume_job(&self, job: &JobId) -> Result<bool> {
        self.with_job(job, |j| Ok(j.resume()))
    }

    pub fn change_priority(&self, job: &JobId, priority: JobPriority) -> Result<()> {
        self.with_job(job, |j| {
            j.change_priority(priority);
            Ok(())
        })
    }

    /// Forget a terminal job and hand back its result.
    pub fn remove_job(&self, job: &JobId) -> Result<JobResult> {
        let result = self.with_job(job, |j| {
            let result = j.result().ok_or_else(|| {
                SchedulerError::InvalidState(format!(
                    "job {job} cannot be removed while {}",
                    j.status()
                ))
            })?;
            j.record_removal();
            Ok(result)
        })?;
        self.jobs.remove(job);
        info!(job = %job, "job removed");
        Ok(result)
    }

    pub fn job_status(&self, job: &JobId) -> Result<JobStatus> {
        self.inspect(job, JobDescriptor::status)
    }

    pub fn job_counters(&self, job: &JobId) -> Result<JobCounters> {
        self.inspect(job, JobDescriptor::counters)
    }

    /// Composed result, `None` until the job is terminal.
    pub fn job_result(&self, job: &JobId) -> Result<Option<JobResult>> {
        self.inspect(job, JobDescriptor::result)
    }

    pub fn snapshot_job(&self, job: &JobId) -> Result<JobSnapshot> {
        self.inspect(job, JobDescriptor::snapshot)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// No job left with work to do.
    pub fn is_idle(&self) -> bool {
        self.handles()
            .iter()
            .all(|h| h.lock().map(|j| j.status().is_terminal()).unwrap_or(true))
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Reload jobs from snapshots.
    ///
    /// Every snapshot is checked before any job is registered: a bad batch
    /// leaves the scheduler untouched. Tasks that were running stay held
    /// back, and completions are refused, until
    /// [`Scheduler::restore_running_tasks`] is called.
    pub fn recover(&self, snapshots: Vec<JobSnapshot>) -> Result<Vec<JobId>> {
        let mut descriptors: Vec<JobDescriptor> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let job = snapshot.job.clone();
            if self.jobs.contains_key(&job) || descriptors.iter().any(|d| d.id() == &job) {
                return Err(SchedulerError::InvalidState(format!(
                    "job {job} is already registered"
                )));
            }
            descriptors.push(JobDescriptor::from_snapshot(snapshot, &self.settings)?);
        }

        self.recovering.store(true, Ordering::SeqCst);
        let mut loaded = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let job = descriptor.id().clone();
            self.ids.observe(&job);
            info!(
                job = %job,
                status = %descriptor.status(),
                tasks = descriptor.graph().len(),
                "job recovered"
            );
            self.jobs.insert(job.clone(), JobHandle::new(descriptor));
            loaded.push(job);
        }
        Ok(loaded)
    }

    /// Re-mark every task that was running at snapshot time as running and
    /// start accepting completions again.
    pub fn restore_running_tasks(&self) -> Result<Vec<TaskId>> {
        let mut restored = Vec::new();
        for handle in self.handles() {
            let mut job = handle.lock()?;
            restored.extend(job.restore_running_tasks());
        }
        self.recovering.store(false, Ordering::SeqCst);
        info!(tasks = restored.len(), "running tasks restored; accepting completions");
        Ok(restored)
    }
}
