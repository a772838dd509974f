// src/config/validate.rs

use crate::config::model::{JobFile, RawJobFile, TaskConfig};
use crate::dag::{JobTemplate, TaskKind, TaskTemplate};
use crate::errors::{Result, SchedulerError};
use crate::job::validate_template;

impl TryFrom<RawJobFile> for JobFile {
    type Error = SchedulerError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_global_config(&raw)?;
        let template = to_template(&raw)?;
        let graph = validate_template(&template)?;
        Ok(JobFile {
            settings: raw.config,
            template,
            graph,
            simulation: raw.simulation,
        })
    }
}

fn ensure_has_tasks(raw: &RawJobFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(SchedulerError::Config(
            "job file must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(raw: &RawJobFile) -> Result<()> {
    let cfg = &raw.config;
    if cfg.max_number_of_execution == 0 {
        return Err(SchedulerError::Config(
            "[config].max_number_of_execution must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.max_number_of_execution_on_failure == 0 {
        return Err(SchedulerError::Config(
            "[config].max_number_of_execution_on_failure must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.event_queue_length == 0 {
        return Err(SchedulerError::Config(
            "[config].event_queue_length must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.schedule_interval_ms == 0 {
        return Err(SchedulerError::Config(
            "[config].schedule_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.job.name.trim().is_empty() {
        return Err(SchedulerError::Config("[job].name must not be empty".to_string()));
    }
    if raw.simulation.replicate_runs == 0 {
        return Err(SchedulerError::Config(
            "[simulation].replicate_runs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn to_template(raw: &RawJobFile) -> Result<JobTemplate> {
    let mut template = JobTemplate::new(raw.job.name.clone());
    template.priority = raw.job.priority;
    template.project = raw.job.project.clone();
    template.generic_information = raw.job.generic_information.clone();
    template.cancel_job_on_error = raw.job.cancel_job_on_error;

    for (name, task) in raw.task.iter() {
        let mut t = TaskTemplate::new(name.clone(), task_kind(name, task)?);
        t.dependencies = task.after.clone();
        t.block = task.block;
        t.matching_block = task.matching_block.clone();
        t.flow = task.flow.clone();
        t.precious_result = task.precious_result;
        if let Some(resources) = task.resources {
            if resources == 0 {
                return Err(SchedulerError::Config(format!(
                    "task '{name}': resources must be >= 1 (got 0)"
                )));
            }
            t.resources = resources;
        }
        t.max_number_of_execution = task.max_number_of_execution;
        t.max_number_of_execution_on_failure = task.max_number_of_execution_on_failure;
        template.tasks.push(t);
    }
    Ok(template)
}

fn task_kind(name: &str, task: &TaskConfig) -> Result<TaskKind> {
    match task.kind.trim().to_lowercase().as_str() {
        "native" => Ok(TaskKind::Native {
            command: task.command.clone().unwrap_or_default(),
        }),
        "java" => {
            let class_name = task.class_name.clone().ok_or_else(|| {
                SchedulerError::Config(format!("java task '{name}' needs a `class_name`"))
            })?;
            Ok(TaskKind::Java { class_name })
        }
        "script" => {
            let source = task.source.clone().ok_or_else(|| {
                SchedulerError::Config(format!("script task '{name}' needs a `source`"))
            })?;
            Ok(TaskKind::Script {
                language: task.language.clone().unwrap_or_else(|| "sh".to_string()),
                source,
            })
        }
        other => Err(SchedulerError::Config(format!(
            "task '{name}' has unknown kind '{other}' (expected native, java or script)"
        ))),
    }
}
