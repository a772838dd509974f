// tests/config_loading.rs

use std::error::Error;
use std::io::Write;

use tempfile::NamedTempFile;

use flowsched::config::{default_config_path, load_and_validate, load_from_path};
use flowsched::dag::{FlowBlock, FlowSpec, TaskKind};
use flowsched::errors::SchedulerError;
use flowsched::exec::IfBranch;
use flowsched::types::{JobPriority, PolicyKind};

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_job_file_loads() -> TestResult {
    let file = write_config(
        r#"
[config]
max_number_of_execution = 2
policy = "fifo"

[job]
name = "nightly"
priority = "high"
project = "etl"
cancel_job_on_error = true

[job.generic_information]
owner = "data"

[simulation]
loop_iterations = 3
if_branch = "else"
fail_first = { extract = 1 }

[task.extract]
command = "extract.sh"
precious_result = true
flow = { action = "if", target = "clean", else = "skip", continuation = "load" }

[task.clean]
kind = "script"
language = "python"
source = "print('clean')"

[task.skip]
kind = "java"
class_name = "org.example.Skip"

[task.load]
block = "start"
matching_block = "verify"
resources = 4

[task.verify]
after = ["load"]
block = "end"
flow = { action = "loop", target = "load" }
"#,
    );

    let job = load_and_validate(file.path())?;
    assert_eq!(job.settings.max_number_of_execution, 2);
    assert_eq!(job.settings.policy, PolicyKind::Fifo);
    assert_eq!(job.template.name, "nightly");
    assert_eq!(job.template.priority, JobPriority::High);
    assert_eq!(job.template.cancel_job_on_error, Some(true));
    assert_eq!(
        job.template.generic_information.get("owner").map(String::as_str),
        Some("data")
    );
    assert_eq!(job.simulation.loop_iterations, 3);
    assert_eq!(job.simulation.if_branch, IfBranch::Else);
    assert_eq!(job.simulation.fail_first.get("extract"), Some(&1));

    let names: Vec<&str> = job.template.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["extract", "clean", "skip", "load", "verify"]);

    let extract = job.template.task("extract").unwrap();
    assert!(extract.precious_result);
    assert!(matches!(extract.flow, Some(FlowSpec::If { ref continuation, .. }) if continuation.as_deref() == Some("load")));
    assert!(matches!(
        job.template.task("clean").unwrap().kind,
        TaskKind::Script { ref language, .. } if language == "python"
    ));
    let load = job.template.task("load").unwrap();
    assert_eq!(load.block, FlowBlock::Start);
    assert_eq!(load.resources, 4);

    // Implicit IF edges are part of the validated graph.
    assert_eq!(job.graph.parents_of("clean"), &["extract".to_string()]);
    assert_eq!(
        job.graph.parents_of("load"),
        &["clean".to_string(), "skip".to_string()]
    );
    Ok(())
}

#[test]
fn defaults_apply_when_sections_are_missing() -> TestResult {
    let file = write_config(
        r#"
[job]
name = "tiny"

[task.A]
"#,
    );
    let job = load_and_validate(file.path())?;
    assert_eq!(job.settings.max_number_of_execution, 1);
    assert_eq!(job.settings.max_number_of_execution_on_failure, 2);
    assert_eq!(job.settings.policy, PolicyKind::Priority);
    assert_eq!(job.template.priority, JobPriority::Normal);
    assert_eq!(job.simulation.loop_iterations, 1);
    assert_eq!(
        job.template.tasks[0].kind,
        TaskKind::Native {
            command: String::new()
        }
    );
    Ok(())
}

#[test]
fn raw_parse_skips_graph_validation() -> TestResult {
    let file = write_config(
        r#"
[job]
name = "raw"

[task.A]
after = ["B"]

[task.B]
after = ["A"]
"#,
    );
    let raw = load_from_path(file.path())?;
    assert_eq!(raw.task.len(), 2);
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SchedulerError::CyclicDependency(_))
    ));
    Ok(())
}

#[test]
fn job_without_tasks_is_a_config_error() {
    let file = write_config("[job]\nname = \"empty\"\n");
    match load_and_validate(file.path()) {
        Err(SchedulerError::Config(msg)) => assert!(msg.contains("at least one")),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn bad_settings_are_config_errors() {
    for contents in [
        "[config]\nmax_number_of_execution = 0\n[job]\nname = \"x\"\n[task.A]\n",
        "[config]\nevent_queue_length = 0\n[job]\nname = \"x\"\n[task.A]\n",
        "[job]\nname = \"  \"\n[task.A]\n",
        "[simulation]\nreplicate_runs = 0\n[job]\nname = \"x\"\n[task.A]\n",
        "[job]\nname = \"x\"\n[task.A]\nresources = 0\n",
        "[job]\nname = \"x\"\n[task.A]\nkind = \"fortran\"\n",
        "[job]\nname = \"x\"\n[task.A]\nkind = \"java\"\n",
        "[job]\nname = \"x\"\n[task.A]\nkind = \"script\"\n",
    ] {
        let file = write_config(contents);
        assert!(
            matches!(load_and_validate(file.path()), Err(SchedulerError::Config(_))),
            "accepted: {contents}"
        );
    }
}

#[test]
fn flow_definition_errors_surface_from_the_loader() {
    let file = write_config(
        r#"
[job]
name = "bad-loop"

[task.A]

[task.B]
after = ["A"]
flow = { action = "loop", target = "A" }
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SchedulerError::InvalidFlowDefinition { .. })
    ));
}

#[test]
fn malformed_toml_and_missing_files_are_reported() {
    let file = write_config("[job\nname = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(SchedulerError::Toml(_))
    ));
    assert!(matches!(
        load_and_validate("/definitely/not/here/Flowsched.toml"),
        Err(SchedulerError::Io(_))
    ));
}

#[test]
fn default_path_is_in_the_working_directory() {
    assert_eq!(default_config_path().to_str(), Some("Flowsched.toml"));
}
