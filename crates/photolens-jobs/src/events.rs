//! Job events and per-listener delivery.
//!
//! Every listener owns a bounded channel. Broadcasting never waits: a
//! listener whose buffer is full misses that event. The terminal event is
//! the last one any listener sees; afterwards every channel is closed and
//! later subscribers receive the stored terminal event immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Kind of a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    PhotosCounted,
    FilteringDone,
    Progress,
    Completed,
    Cancelled,
    JobError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::PhotosCounted => "photos_counted",
            EventType::FilteringDone => "filtering_done",
            EventType::Progress => "progress",
            EventType::Completed => "completed",
            EventType::Cancelled => "cancelled",
            EventType::JobError => "job_error",
        }
    }

    /// Completed, cancelled and job_error end a job's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::Completed | EventType::Cancelled | EventType::JobError
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, timestamped job event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(event_type: EventType, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct HubState {
    listeners: HashMap<u64, mpsc::Sender<JobEvent>>,
    next_id: u64,
    terminal: Option<JobEvent>,
    dropped: u64,
}

/// Registry of listener channels for one job.
pub struct EventHub {
    state: Mutex<HubState>,
    buffer: usize,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a listener. After termination the returned stream yields the
    /// terminal event and then ends.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut state = self.lock();
        let (tx, rx) = mpsc::channel(self.buffer);
        if let Some(terminal) = state.terminal.clone() {
            // Capacity is at least one, so this cannot fail.
            let _ = tx.try_send(terminal);
            return Subscription {
                id: None,
                rx,
                hub: Arc::clone(self),
            };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, tx);
        trace!(listener = id, "Listener attached");
        Subscription {
            id: Some(id),
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Detach a listener, closing only its channel.
    pub fn unsubscribe(&self, id: u64) {
        self.lock().listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Events dropped because a listener's buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    pub fn terminal_event(&self) -> Option<JobEvent> {
        self.lock().terminal.clone()
    }

    /// Deliver an event to every listener without waiting.
    ///
    /// Returns false when the hub is already closed. A terminal event closes
    /// the hub after one delivery attempt per listener.
    pub fn broadcast(&self, event: JobEvent) -> bool {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return false;
        }

        let terminal = event.event_type.is_terminal();
        let mut closed = Vec::new();
        let mut dropped = 0u64;
        for (id, tx) in &state.listeners {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            state.listeners.remove(&id);
        }
        if dropped > 0 {
            state.dropped += dropped;
            debug!(
                event = %event.event_type,
                dropped,
                "Slow listeners missed an event"
            );
        }

        if terminal {
            state.terminal = Some(event);
            state.listeners.clear();
        }
        true
    }
}

/// A listener's receiving end. Dropping it detaches the listener.
pub struct Subscription {
    id: Option<u64>,
    rx: mpsc::Receiver<JobEvent>,
    hub: Arc<EventHub>,
}

impl Subscription {
    /// Next event; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// The job's terminal event, if it has ended.
    pub fn terminal_event(&self) -> Option<JobEvent> {
        self.hub.terminal_event()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.hub.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(n: usize) -> JobEvent {
        JobEvent::new(EventType::Progress, "progress", json!({ "current": n }))
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = JobEvent::new(EventType::PhotosCounted, "42 photos", json!({ "count": 42 }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "photos_counted");
        assert_eq!(value["data"]["count"], 42);
    }

    #[test]
    fn test_terminal_types() {
        assert!(EventType::Completed.is_terminal());
        assert!(EventType::Cancelled.is_terminal());
        assert!(EventType::JobError.is_terminal());
        assert!(!EventType::Progress.is_terminal());
        assert!(!EventType::Started.is_terminal());
    }

    #[tokio::test]
    async fn test_every_listener_receives_events() {
        let hub = Arc::new(EventHub::new(8));
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.listener_count(), 2);

        hub.broadcast(progress(1));
        assert_eq!(a.recv().await.unwrap().data["current"], 1);
        assert_eq!(b.recv().await.unwrap().data["current"], 1);
    }

    #[tokio::test]
    async fn test_terminal_closes_channels() {
        let hub = Arc::new(EventHub::new(8));
        let mut sub = hub.subscribe();
        hub.broadcast(progress(1));
        hub.broadcast(JobEvent::new(EventType::Completed, "done", json!({})));
        assert!(!hub.broadcast(progress(2)));

        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Progress);
        assert_eq!(sub.recv().await.unwrap().event_type, EventType::Completed);
        assert!(sub.recv().await.is_none());
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal() {
        let hub = Arc::new(EventHub::new(4));
        hub.broadcast(JobEvent::new(EventType::Cancelled, "cancelled", json!({})));

        let mut late = hub.subscribe();
        assert_eq!(late.recv().await.unwrap().event_type, EventType::Cancelled);
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_listener_drops_without_blocking() {
        let hub = Arc::new(EventHub::new(1));
        let mut slow = hub.subscribe();
        hub.broadcast(progress(1));
        hub.broadcast(progress(2));
        assert_eq!(hub.dropped_count(), 1);
        assert_eq!(slow.recv().await.unwrap().data["current"], 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches() {
        let hub = Arc::new(EventHub::new(4));
        let a = hub.subscribe();
        let _b = hub.subscribe();
        drop(a);
        assert_eq!(hub.listener_count(), 1);
    }
}
