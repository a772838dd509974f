#![allow(dead_code)]

use flowsched::dag::{FlowBlock, FlowSpec, JobTemplate, TaskKind, TaskTemplate};
use flowsched::types::JobPriority;

/// Builder for `JobTemplate` to simplify test setup.
pub struct JobTemplateBuilder {
    template: JobTemplate,
}

impl JobTemplateBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            template: JobTemplate::new(name),
        }
    }

    pub fn with_task(mut self, task: TaskTemplateBuilder) -> Self {
        self.template.tasks.push(task.build());
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.template.priority = priority;
        self
    }

    pub fn project(mut self, project: &str) -> Self {
        self.template.project = Some(project.to_string());
        self
    }

    pub fn info(mut self, key: &str, value: &str) -> Self {
        self.template
            .generic_information
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn cancel_job_on_error(mut self, val: bool) -> Self {
        self.template.cancel_job_on_error = Some(val);
        self
    }

    pub fn build(self) -> JobTemplate {
        self.template
    }
}

/// Shorthand for `TaskTemplateBuilder::new`.
pub fn task(name: &str) -> TaskTemplateBuilder {
    TaskTemplateBuilder::new(name)
}

/// Builder for `TaskTemplate`.
pub struct TaskTemplateBuilder {
    task: TaskTemplate,
}

impl TaskTemplateBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskTemplate::new(
                name,
                TaskKind::Native {
                    command: format!("echo {name}"),
                },
            ),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.task.kind = kind;
        self
    }

    /// Open a flow block closed by `end`.
    pub fn start(mut self, end: &str) -> Self {
        self.task.block = FlowBlock::Start;
        self.task.matching_block = Some(end.to_string());
        self
    }

    pub fn end(mut self) -> Self {
        self.task.block = FlowBlock::End;
        self
    }

    pub fn if_flow(mut self, target: &str, else_target: &str, continuation: Option<&str>) -> Self {
        self.task.flow = Some(FlowSpec::If {
            target: target.to_string(),
            else_target: else_target.to_string(),
            continuation: continuation.map(str::to_string),
        });
        self
    }

    pub fn loop_to(mut self, target: &str) -> Self {
        self.task.flow = Some(FlowSpec::Loop {
            target: target.to_string(),
        });
        self
    }

    pub fn replicate(mut self) -> Self {
        self.task.flow = Some(FlowSpec::Replicate);
        self
    }

    pub fn precious(mut self) -> Self {
        self.task.precious_result = true;
        self
    }

    pub fn resources(mut self, n: u32) -> Self {
        self.task.resources = n;
        self
    }

    pub fn executions(mut self, n: u32) -> Self {
        self.task.max_number_of_execution = Some(n);
        self
    }

    pub fn failure_executions(mut self, n: u32) -> Self {
        self.task.max_number_of_execution_on_failure = Some(n);
        self
    }

    pub fn build(self) -> TaskTemplate {
        self.task
    }
}
