// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod ids;
pub mod job;
pub mod logging;
pub mod policy;
pub mod types;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{JobFile, load_and_validate};
use crate::dag::{FlowBlock, FlowSpec, TaskKind};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, Scheduler};
use crate::events::LoggingListener;
use crate::exec::SimulatedExecutorBackend;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job file loading and validation
/// - scheduler / runtime
/// - the simulated executor
/// - Ctrl-C handling
///
/// The composed job result is printed to stdout as JSON.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let file = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&file);
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::new(file.settings.clone()));
    scheduler.add_listener(Arc::new(LoggingListener));
    let job = scheduler.submit(file.template.clone())?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(file.settings.event_queue_length);

    let executor = SimulatedExecutorBackend::new(rt_tx.clone(), file.simulation.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions {
        exit_when_idle: true,
        schedule_interval: Duration::from_millis(file.settings.schedule_interval_ms),
    };
    let core = CoreRuntime::new(Arc::clone(&scheduler), options);
    Runtime::new(core, rt_rx, executor).run().await?;

    if scheduler.kill_job(&job)? {
        warn!(job = %job, "runtime stopped before the job finished; job killed");
    }

    if let Some(path) = &args.snapshot {
        let snapshot = scheduler.snapshot_job(&job)?;
        fs::write(path, snapshot.to_json()?)?;
        info!(path = %path, "job snapshot written");
    }

    let result = scheduler.remove_job(&job)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Simple dry-run output: print the job, its tasks and their wiring.
fn print_dry_run(file: &JobFile) {
    let template = &file.template;
    println!("flowsched dry-run");
    println!("  job = {}", template.name);
    println!("  priority = {}", template.priority);
    if let Some(project) = &template.project {
        println!("  project = {project}");
    }
    println!(
        "  config.max_number_of_execution = {}",
        file.settings.max_number_of_execution
    );
    println!(
        "  config.max_number_of_execution_on_failure = {}",
        file.settings.max_number_of_execution_on_failure
    );
    println!(
        "  cancel_job_on_error = {}",
        template
            .cancel_job_on_error
            .unwrap_or(file.settings.cancel_job_on_error)
    );
    println!();

    println!("tasks ({}):", file.graph.len());
    for task in file.graph.templates() {
        println!("  - {}", task.name);
        match &task.kind {
            TaskKind::Native { command } if !command.is_empty() => {
                println!("      command: {command}")
            }
            TaskKind::Native { .. } => {}
            TaskKind::Java { class_name } => println!("      java: {class_name}"),
            TaskKind::Script { language, .. } => println!("      script: {language}"),
        }
        let parents = file.graph.parents_of(&task.name);
        if !parents.is_empty() {
            println!("      after: {parents:?}");
        }
        match task.block {
            FlowBlock::Start => println!(
                "      block: start (ends at {})",
                task.matching_block.as_deref().unwrap_or("?")
            ),
            FlowBlock::End => println!("      block: end"),
            FlowBlock::None => {}
        }
        match &task.flow {
            Some(FlowSpec::If {
                target,
                else_target,
                continuation,
            }) => {
                print!("      flow: if {target} else {else_target}");
                match continuation {
                    Some(c) => println!(" then {c}"),
                    None => println!(),
                }
            }
            Some(FlowSpec::Loop { target }) => println!("      flow: loop to {target}"),
            Some(FlowSpec::Replicate) => println!("      flow: replicate"),
            None => {}
        }
        if task.precious_result {
            println!("      precious_result: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
