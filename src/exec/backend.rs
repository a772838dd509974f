// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake executor.
//!
//! - `ChannelExecutorBackend` forwards dispatch requests over an mpsc
//!   channel to whatever actually runs tasks (node pool, remote workers).
//!   That collaborator reports back by sending `RuntimeEvent::TaskTerminated`.
//! - Tests can provide their own `ExecutorBackend` that records which tasks
//!   were dispatched and emits outcomes directly.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::dag::DispatchRequest;
use crate::errors::Result;

/// Trait abstracting how dispatched tasks are executed.
pub trait ExecutorBackend: Send {
    /// Hand the given tasks over for execution.
    ///
    /// Must not wait for the tasks to finish: outcomes are reported
    /// asynchronously through the runtime event channel.
    fn dispatch(
        &mut self,
        tasks: Vec<DispatchRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Forwards dispatch requests to an external executor.
pub struct ChannelExecutorBackend {
    tx: mpsc::Sender<DispatchRequest>,
}

impl ChannelExecutorBackend {
    pub fn new(tx: mpsc::Sender<DispatchRequest>) -> Self {
        Self { tx }
    }

    /// Backend plus the receiving end the executor reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ExecutorBackend for ChannelExecutorBackend {
    fn dispatch(
        &mut self,
        tasks: Vec<DispatchRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                let name = task.task.readable_name();
                tx.send(task)
                    .await
                    .map_err(|_| anyhow!("executor channel closed while dispatching {name}"))?;
            }
            Ok(())
        })
    }
}
