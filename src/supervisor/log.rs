//! Lifecycle audit trail: one JSON object per line on stderr.
//!
//! Separate from `tracing` so the spawn/exit/respawn/re-key history can be
//! grepped or piped without the filter settings getting in the way.

use botfleet_agent::UnitId;
use botfleet_core::AgentHandle;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct LogEvent<'a> {
    pub ts: String,
    pub level: &'static str,
    pub event: &'static str,
    pub bot: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<u64>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl<'a> LogEvent<'a> {
    pub fn new(level: &'static str, event: &'static str, bot: &'a AgentHandle, unit: Option<UnitId>) -> Self {
        Self {
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            level,
            event,
            bot: bot.as_str(),
            unit: unit.map(|u| u.0),
            data: serde_json::Value::Null,
        }
    }

    pub fn with(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn emit(self) {
        if let Ok(json) = serde_json::to_string(&self) {
            eprintln!("{json}");
        }
    }
}

pub fn info(event: &'static str, bot: &AgentHandle, unit: Option<UnitId>, data: serde_json::Value) {
    LogEvent::new("info", event, bot, unit).with(data).emit();
}

pub fn warn(event: &'static str, bot: &AgentHandle, unit: Option<UnitId>, data: serde_json::Value) {
    LogEvent::new("warn", event, bot, unit).with(data).emit();
}
