//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port with logging and in-memory backends.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::events::ClusterEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Logging-based event publisher.
///
/// Writes cluster events to the tracing subscriber as structured fields.
/// Aborted rebalances are always logged at warn.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: ClusterEvent) -> Result<()> {
        let event_type = event.event_type();
        let at = event.timestamp().to_rfc3339();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        match event {
            ClusterEvent::RebalanceAborted { .. } => {
                warn!(event_type, at = %at, event = %json, "Cluster event")
            }
            _ if self.info_level => info!(event_type, at = %at, event = %json, "Cluster event"),
            _ => debug!(event_type, at = %at, event = %json, "Cluster event"),
        }

        Ok(())
    }
}

/// In-memory event collector for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<ClusterEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events, oldest first
    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Type names of collected events, oldest first
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event_type()).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<ClusterEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: ClusterEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<ClusterEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}
