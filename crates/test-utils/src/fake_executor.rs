use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use flowsched::dag::DispatchRequest;
use flowsched::engine::RuntimeEvent;
use flowsched::errors::Result;
use flowsched::exec::ExecutorBackend;
use flowsched::job::TaskOutcome;
use tokio::sync::mpsc;

type Decide = dyn Fn(&DispatchRequest) -> TaskOutcome + Send + Sync;

/// A fake executor that:
/// - records which tasks were dispatched (readable names)
/// - reports an outcome for each one from a spawned task; by default a
///   success carrying the task's readable name.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    decide: Arc<Decide>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            decide: Arc::new(|r: &DispatchRequest| {
                TaskOutcome::success(serde_json::json!(r.task.readable_name()))
            }),
        }
    }

    /// Decide outcomes with `decide` instead of plain successes.
    pub fn with_outcomes<F>(mut self, decide: F) -> Self
    where
        F: Fn(&DispatchRequest) -> TaskOutcome + Send + Sync + 'static,
    {
        self.decide = Arc::new(decide);
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        tasks: Vec<DispatchRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let decide = Arc::clone(&self.decide);

        Box::pin(async move {
            for request in tasks {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(request.task.readable_name());
                }
                let outcome = decide(&request);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(RuntimeEvent::TaskTerminated {
                            task: request.task,
                            outcome,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }
}
