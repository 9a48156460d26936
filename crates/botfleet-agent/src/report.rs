use crate::unit::UnitId;
use botfleet_core::UnitEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upward event sink for one unit. Every event is tagged with the unit id so
/// the supervisor can discard events from units it no longer tracks.
#[derive(Clone)]
pub struct Reporter {
    unit: UnitId,
    tx: mpsc::UnboundedSender<(UnitId, UnitEvent)>,
}

impl Reporter {
    pub fn new(unit: UnitId, tx: mpsc::UnboundedSender<(UnitId, UnitEvent)>) -> Self {
        Self { unit, tx }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn send(&self, event: UnitEvent) {
        if self.tx.send((self.unit, event)).is_err() {
            debug!(unit = %self.unit, "supervisor gone, event dropped");
        }
    }

    pub fn status(&self, status: impl Into<String>) {
        let status = status.into();
        info!(unit = %self.unit, %status, "status");
        self.send(UnitEvent::status(status));
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!(unit = %self.unit, "{}", text);
        self.send(UnitEvent::info(text));
    }

    pub fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(unit = %self.unit, "{}", text);
        self.send(UnitEvent::warn(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(unit = %self.unit, "error: {}", text);
        self.send(UnitEvent::error(text));
    }
}
