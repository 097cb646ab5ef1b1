//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use super::ForgeEvent;

/// Receives orchestrator lifecycle events.
///
/// Sinks are observers only: nothing they do can change a run's outcome.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &ForgeEvent);

    /// Emits an event without blocking. Must never panic.
    fn try_emit(&self, event: &ForgeEvent);
}

/// Discards every event. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &ForgeEvent) {}

    fn try_emit(&self, _event: &ForgeEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (DEBUG or INFO).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &ForgeEvent) {
        let data = event.to_json();
        if self.level == Level::DEBUG {
            debug!(event_type = event.event_type(), slug = event.slug(), event_data = %data, "Event: {}", event.event_type());
        } else {
            info!(event_type = event.event_type(), slug = event.slug(), event_data = %data, "Event: {}", event.event_type());
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &ForgeEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &ForgeEvent) {
        self.log_event(event);
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<ForgeEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ForgeEvent> {
        self.events.read().clone()
    }

    /// The event type names, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(ForgeEvent::event_type).collect()
    }

    /// Events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<ForgeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &ForgeEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &ForgeEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;

    fn started() -> ForgeEvent {
        ForgeEvent::StageStarted {
            slug: "a".to_string(),
            stage: StageName::ContentGeneration,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(&started()).await;
        let sink = LoggingEventSink::debug();
        sink.emit(&started()).await;
        sink.try_emit(&started());
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        sink.emit(&ForgeEvent::RunStarted {
            slug: "a".to_string(),
            topic: "t".to_string(),
            created: true,
        })
        .await;
        sink.emit(&started()).await;
        sink.try_emit(&started());

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.event_types()[0], "run.started");

        sink.clear();
        assert!(sink.is_empty());
    }
}
