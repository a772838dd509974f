// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::dag::DispatchRequest;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s and a periodic
/// scheduling tick, and delegates execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// The first tick fires immediately, so jobs submitted before `run`
    /// start without waiting a full interval.
    pub async fn run(mut self) -> Result<()> {
        info!("flowsched runtime started");

        let mut ticker = time::interval(self.core.options().schedule_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                received = self.event_rx.recv() => match received {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = ticker.tick() => RuntimeEvent::ScheduleTick,
            };

            if !matches!(event, RuntimeEvent::ScheduleTick) {
                debug!(?event, "runtime received event");
            }

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(requests) => self.dispatch(requests).await?,
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, requests: Vec<DispatchRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = requests.iter().map(|r| r.task.readable_name()).collect();
        debug!(?names, "dispatching tasks");
        self.executor.dispatch(requests).await
    }
}
