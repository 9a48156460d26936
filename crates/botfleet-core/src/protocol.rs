//! Message protocol between the control surface, the supervisor, and units.
//!
//! Control surface wire format (one JSON object per WebSocket text frame):
//!
//! Server → Client (event push):
//!   { "event": "bot-status-update", "data": { "username": "Alice", "status": "Following Bob" } }
//!
//! Client → Server:
//!   { "event": "send-command", "data": { "command": "follow", "target": "Bob" } }
//!   { "event": "send-command", "data": { "command": "stop", "bot": "Alice" } }
//!   { "event": "spawn-auth-bot" }
//!
//! Supervisor → Unit messages are [`Command`]s; Unit → Supervisor messages are
//! [`UnitEvent`]s. Both are closed enums so every dispatch is exhaustive.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Supervisor → Unit
// ---------------------------------------------------------------------------

/// A behavior command addressed to one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Follow { target: String },
    Grief { target: String },
    Trap { target: String },
    /// Directional sweep. The supervisor overwrites `angle` per unit on broadcast.
    Clearmap {
        #[serde(default)]
        angle: f64,
    },
    Stop,
    Chat { message: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Follow { .. } => "follow",
            Self::Grief { .. } => "grief",
            Self::Trap { .. } => "trap",
            Self::Clearmap { .. } => "clearmap",
            Self::Stop => "stop",
            Self::Chat { .. } => "chat",
        }
    }

    /// Whether receiving this command abandons the in-flight behavior.
    pub fn preempts(&self) -> bool {
        !matches!(self, Self::Chat { .. })
    }
}

// ---------------------------------------------------------------------------
// Unit → Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Chat,
}

/// Structured event emitted by a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UnitEvent {
    /// Device-code login started; the user must visit `link` and enter `user_code`.
    AuthLink { link: String, user_code: String },
    /// The server accepted the login and assigned `nickname`.
    Authenticated { nickname: String },
    StatusUpdate { status: String },
    Log { text: String, level: LogLevel },
    Error { text: String },
}

impl UnitEvent {
    pub fn status(status: impl Into<String>) -> Self {
        Self::StatusUpdate {
            status: status.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::Log {
            text: text.into(),
            level: LogLevel::Info,
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::Log {
            text: text.into(),
            level: LogLevel::Warn,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Supervisor → Control surface
// ---------------------------------------------------------------------------

/// Event pushed to every connected control-surface client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SurfaceEvent {
    AuthLink {
        link: String,
        user_code: String,
        username: String,
    },
    BotAuthenticated {
        #[serde(rename = "tempUsername")]
        temp_username: String,
        #[serde(rename = "finalUsername")]
        final_username: String,
    },
    BotStatusUpdate {
        username: String,
        status: String,
    },
    BotOnline {
        username: String,
        status: String,
    },
    BotOffline {
        username: String,
    },
    Log {
        bot: String,
        text: String,
        #[serde(rename = "type")]
        kind: LogLevel,
    },
}

impl SurfaceEvent {
    pub fn log(bot: impl Into<String>, text: impl Into<String>, kind: LogLevel) -> Self {
        Self::Log {
            bot: bot.into(),
            text: text.into(),
            kind,
        }
    }

    /// Wire name of the event, as used in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthLink { .. } => "auth-link",
            Self::BotAuthenticated { .. } => "bot-authenticated",
            Self::BotStatusUpdate { .. } => "bot-status-update",
            Self::BotOnline { .. } => "bot-online",
            Self::BotOffline { .. } => "bot-offline",
            Self::Log { .. } => "log",
        }
    }
}

/// One row of the live roster, in spawn order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSummary {
    /// Final handle once authenticated, otherwise the initial handle.
    pub username: String,
    pub status: String,
    pub auth_flow: bool,
}

impl BotSummary {
    /// The `bot-online` event a freshly connected client gets for this row.
    pub fn online_event(&self) -> SurfaceEvent {
        SurfaceEvent::BotOnline {
            username: self.username.clone(),
            status: self.status.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Control surface → Supervisor
// ---------------------------------------------------------------------------

/// Request sent by a control-surface client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SurfaceCommand {
    SpawnAuthBot,
    SendCommand {
        /// Single recipient; absent means every live unit.
        #[serde(default)]
        bot: Option<String>,
        #[serde(flatten)]
        command: Command,
    },
    SendChat {
        message: String,
    },
    DisconnectAll,
}
