use std::sync::Mutex;

use flowsched::events::{SchedulerEvent, SchedulerListener};
use flowsched::ids::JobId;

/// Listener that keeps every event it receives, in delivery order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.tag()).collect()
    }

    pub fn tags_for(&self, job: &JobId) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job() == job)
            .map(|e| e.tag())
            .collect()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.tag() == tag)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl SchedulerListener for RecordingListener {
    fn on_event(&self, event: &SchedulerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
