use botfleet_agent::{UnitExit, UnitId, FAULT_EXIT_CODE};
use botfleet_core::{AgentHandle, BotSummary, Command};
use tokio::sync::oneshot;

/// Requests accepted by the supervisor actor.
#[derive(Debug)]
pub enum FleetRequest {
    Spawn {
        handle: AgentHandle,
        auth_flow: bool,
    },
    /// Start a device-code login under a generated temporary handle.
    SpawnAuth,
    /// `bot: None` broadcasts to every live unit.
    Command {
        bot: Option<String>,
        command: Command,
    },
    Chat {
        message: String,
    },
    TerminateAll,
    Roster {
        reply: oneshot::Sender<Vec<BotSummary>>,
    },
    Lookup {
        name: String,
        reply: oneshot::Sender<Option<UnitLookup>>,
    },
    Shutdown,
}

/// Where a name currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLookup {
    pub id: UnitId,
    /// The unit's current key in the identity map.
    pub key: AgentHandle,
}

/// How a unit task ended, as seen by its watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReport {
    Exited(UnitExit),
    /// The task panicked.
    Fault(String),
}

impl ExitReport {
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(exit) => exit.code(),
            Self::Fault(_) => FAULT_EXIT_CODE,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        match self {
            Self::Exited(exit) => exit.is_abnormal(),
            Self::Fault(_) => true,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Exited(UnitExit::Clean) => "clean".into(),
            Self::Exited(UnitExit::Terminated) => "terminated".into(),
            Self::Exited(UnitExit::ConnectionLost(r)) => format!("connection lost: {r}"),
            Self::Exited(UnitExit::ConnectFailed(r)) => format!("connect failed: {r}"),
            Self::Fault(msg) => format!("fault: {msg}"),
        }
    }
}

/// Messages from supervisor-owned helper tasks back into the actor.
#[derive(Debug)]
pub(crate) enum Internal {
    Exited { id: UnitId, report: ExitReport },
    RespawnDue(AgentHandle),
}
