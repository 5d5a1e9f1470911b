//! Event bus for stack lifecycle events.
//!
//! Provides a publish/subscribe mechanism for parent and child stack
//! transitions, so harnesses can follow a deployment without polling.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//!
//! // Subscribe to parent stack events
//! let mut rx = bus.subscribe(vec!["stack.*".to_string()]);
//!
//! bus.publish(Event::new(EventType::StackCreateComplete, "multi_region", "all children created"));
//!
//! while let Some(event) = rx.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! ```

use crate::types::StackStatus;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Event types for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Parent stack events
    StackCreateStarted,
    StackCreateComplete,
    StackCreateFailed,
    StackDeleteStarted,
    StackDeleteComplete,
    StackDeleteFailed,

    // Child stack events
    ChildCreated,
    ChildStatusChanged,
    ChildTimedOut,
}

impl EventType {
    /// Get the event type string (e.g., "stack.create_complete").
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StackCreateStarted => "stack.create_started",
            EventType::StackCreateComplete => "stack.create_complete",
            EventType::StackCreateFailed => "stack.create_failed",
            EventType::StackDeleteStarted => "stack.delete_started",
            EventType::StackDeleteComplete => "stack.delete_complete",
            EventType::StackDeleteFailed => "stack.delete_failed",
            EventType::ChildCreated => "child.created",
            EventType::ChildStatusChanged => "child.status_changed",
            EventType::ChildTimedOut => "child.timed_out",
        }
    }

    /// Get the resource type ("stack" or "child").
    pub fn resource_type(&self) -> &'static str {
        match self {
            EventType::StackCreateStarted
            | EventType::StackCreateComplete
            | EventType::StackCreateFailed
            | EventType::StackDeleteStarted
            | EventType::StackDeleteComplete
            | EventType::StackDeleteFailed => "stack",
            EventType::ChildCreated | EventType::ChildStatusChanged | EventType::ChildTimedOut => {
                "child"
            }
        }
    }

    /// Get the action (e.g., "create_complete").
    pub fn action(&self) -> &'static str {
        match self {
            EventType::StackCreateStarted => "create_started",
            EventType::StackCreateComplete => "create_complete",
            EventType::StackCreateFailed => "create_failed",
            EventType::StackDeleteStarted => "delete_started",
            EventType::StackDeleteComplete => "delete_complete",
            EventType::StackDeleteFailed => "delete_failed",
            EventType::ChildCreated => "created",
            EventType::ChildStatusChanged => "status_changed",
            EventType::ChildTimedOut => "timed_out",
        }
    }

    /// Parent event announcing that the parent reached `status`, if any.
    pub fn for_parent_status(status: StackStatus) -> Option<Self> {
        match status {
            StackStatus::CreateInProgress => Some(EventType::StackCreateStarted),
            StackStatus::CreateComplete => Some(EventType::StackCreateComplete),
            StackStatus::CreateFailed => Some(EventType::StackCreateFailed),
            StackStatus::DeleteInProgress => Some(EventType::StackDeleteStarted),
            StackStatus::DeleteComplete => Some(EventType::StackDeleteComplete),
            StackStatus::DeleteFailed => Some(EventType::StackDeleteFailed),
            StackStatus::Pending | StackStatus::NotFound => None,
        }
    }
}

/// A lifecycle event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Event type string (e.g., "child.created")
    pub event_type: String,
    /// Resource type ("stack" or "child")
    pub resource_type: String,
    /// Parent name or child logical name
    pub resource_id: String,
    /// Action (e.g., "created", "timed_out")
    pub action: String,
    /// Human-readable message
    pub message: String,
    /// Additional metadata (parent, region, status, ...)
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event.
    pub fn new(event_type: EventType, resource_id: &str, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            event_type: event_type.as_str().to_string(),
            resource_type: event_type.resource_type().to_string(),
            resource_id: resource_id.to_string(),
            action: event_type.action().to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Event bus for publishing and subscribing to lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, resource_id = %event.resource_id, "Publishing event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events, optionally filtered by event type patterns.
    ///
    /// # Filter patterns
    ///
    /// - `"stack.*"` - All parent stack events
    /// - `"child.*"` - All child stack events
    /// - `"child.timed_out"` - Only monitor timeouts
    /// - Empty list - All events
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        EventSubscriber { receiver: self.sender.subscribe(), filters }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscriber with optional filtering.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
    filters: Vec<String>,
}

impl EventSubscriber {
    /// Receive the next matching event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Check if an event matches the filters.
    fn matches(&self, event: &Event) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        self.filters.iter().any(|filter| match filter.strip_suffix(".*") {
            Some(prefix) => event
                .event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')),
            None => filter == &event.event_type,
        })
    }
}
