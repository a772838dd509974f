// src/dag/template.rs

//! Static job description: template tasks, flow blocks and declared flow
//! control, plus the [`TemplateGraph`] the flow engine clones from.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::JobPriority;

/// What a task executes. The scheduling core never looks inside; the
/// variant is carried through to the executor boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskKind {
    Java { class_name: String },
    Native { command: String },
    Script { language: String, source: String },
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Native {
            command: String::new(),
        }
    }
}

/// Position of a task in a START/END delimited flow block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowBlock {
    #[default]
    None,
    Start,
    End,
}

/// Control flow a task declares it may perform when it finishes.
///
/// The runtime decision (which branch, whether to loop, how many runs) comes
/// from the executor as a [`crate::dag::FlowAction`] and must agree with the
/// declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FlowSpec {
    If {
        target: String,
        #[serde(rename = "else")]
        else_target: String,
        #[serde(default)]
        continuation: Option<String>,
    },
    Loop {
        target: String,
    },
    Replicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Explicit dependencies, by template name.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub block: FlowBlock,
    /// For a START task, the name of the END task closing its block.
    #[serde(default)]
    pub matching_block: Option<String>,
    #[serde(default)]
    pub flow: Option<FlowSpec>,
    #[serde(default)]
    pub precious_result: bool,
    #[serde(default = "default_resources")]
    pub resources: u32,
    #[serde(default)]
    pub max_number_of_execution: Option<u32>,
    #[serde(default)]
    pub max_number_of_execution_on_failure: Option<u32>,
}

fn default_resources() -> u32 {
    1
}

impl TaskTemplate {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: Vec::new(),
            block: FlowBlock::None,
            matching_block: None,
            flow: None,
            precious_result: false,
            resources: default_resources(),
            max_number_of_execution: None,
            max_number_of_execution_on_failure: None,
        }
    }
}

/// Everything the submission boundary receives for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub generic_information: BTreeMap<String, String>,
    /// Overrides the scheduler-wide default when set.
    #[serde(default)]
    pub cancel_job_on_error: Option<bool>,
    pub tasks: Vec<TaskTemplate>,
}

impl JobTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: JobPriority::default(),
            project: None,
            generic_information: BTreeMap::new(),
            cancel_job_on_error: None,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskTemplate> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Validated template graph: explicit dependencies plus the implicit edges
/// wired for IF declarations.
///
/// Nodes iterate in template order; edges are deduplicated.
#[derive(Debug, Clone)]
pub struct TemplateGraph {
    tasks: IndexMap<String, Arc<TaskTemplate>>,
    parents: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
}

impl TemplateGraph {
    pub(crate) fn new(
        tasks: impl IntoIterator<Item = TaskTemplate>,
        edges: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let tasks: IndexMap<String, Arc<TaskTemplate>> = tasks
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for name in tasks.keys() {
            parents.insert(name.clone(), Vec::new());
            children.insert(name.clone(), Vec::new());
        }

        for (from, to) in edges {
            let kids = children.entry(from.clone()).or_default();
            if kids.contains(&to) {
                continue;
            }
            kids.push(to.clone());
            parents.entry(to).or_default().push(from);
        }

        Self {
            tasks,
            parents,
            children,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskTemplate>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn templates(&self) -> impl Iterator<Item = &Arc<TaskTemplate>> {
        self.tasks.values()
    }

    pub fn parents_of(&self, name: &str) -> &[String] {
        self.parents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All `(parent, child)` edges in template order.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.tasks
            .keys()
            .flat_map(|parent| {
                self.children_of(parent)
                    .iter()
                    .map(move |child| (parent.clone(), child.clone()))
            })
            .collect()
    }

    /// Last task of the block opened by `name`: its matching END for a START
    /// task, the task itself otherwise.
    pub fn block_end<'a>(&'a self, name: &'a str) -> &'a str {
        match self.tasks.get(name) {
            Some(t) if t.block == FlowBlock::Start => {
                t.matching_block.as_deref().unwrap_or(name)
            }
            _ => name,
        }
    }

    /// `name` and everything reachable below it.
    pub fn descendants(&self, name: &str) -> HashSet<String> {
        self.walk(name, |n| self.children_of(n))
    }

    /// `name` and everything it transitively depends on.
    pub fn ancestors(&self, name: &str) -> HashSet<String> {
        self.walk(name, |n| self.parents_of(n))
    }

    /// Tasks lying on some path from `start` to `end` (both inclusive), in
    /// template order. Empty when `end` is not reachable from `start`.
    pub fn nodes_between(&self, start: &str, end: &str) -> Vec<String> {
        let below = self.descendants(start);
        if !below.contains(end) {
            return Vec::new();
        }
        let above = self.ancestors(end);
        self.tasks
            .keys()
            .filter(|n| below.contains(*n) && above.contains(*n))
            .cloned()
            .collect()
    }

    fn walk<'a, F>(&'a self, from: &str, next: F) -> HashSet<String>
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut seen = HashSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            stack.extend(next(&name).iter().cloned());
        }
        seen
    }
}
