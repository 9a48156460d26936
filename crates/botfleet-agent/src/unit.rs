//! Execution unit: one connection, one behavior engine, one task.

use crate::accounts::AccountStore;
use crate::behavior::Behavior;
use crate::report::Reporter;
use crate::world::{ConnectOptions, Connector, WorldEvent};
use botfleet_core::{AgentHandle, BehaviorConfig, Command, ServerConfig, UnitEvent};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Process-unique id of one unit incarnation. A respawned unit gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Why a unit stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    /// Command mailbox closed; the unit quit on request.
    Clean,
    ConnectionLost(String),
    ConnectFailed(String),
    /// Stopped by the supervisor.
    Terminated,
}

/// Exit code reported for a unit that panicked.
pub const FAULT_EXIT_CODE: i32 = 101;

impl UnitExit {
    pub fn code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::ConnectionLost(_) => 1,
            Self::ConnectFailed(_) => 2,
            Self::Terminated => 143,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::ConnectFailed(_))
    }
}

/// Cancellation source for the in-flight behavior. Every preempting command
/// cancels the current token and installs a fresh one.
#[derive(Debug, Default)]
pub struct Preempt {
    current: Mutex<CancellationToken>,
}

impl Preempt {
    pub fn token(&self) -> CancellationToken {
        match self.current.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn cancel_current(&self) {
        let mut guard = match self.current.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

/// Supervisor-side command sender for one unit.
#[derive(Debug, Clone)]
pub struct UnitMailbox {
    tx: mpsc::UnboundedSender<Command>,
    preempt: Arc<Preempt>,
}

impl UnitMailbox {
    /// Queue a command. Returns false if the unit is gone.
    ///
    /// A preempting command interrupts an in-flight trap build here, before
    /// the unit has checked the command. If the unit then rejects it (target
    /// not visible) the mode is unchanged and the next tick resumes the build
    /// over the offsets still empty.
    pub fn send(&self, command: Command) -> bool {
        if command.preempts() {
            self.preempt.cancel_current();
        }
        self.tx.send(command).is_ok()
    }
}

/// Unit-side end of the mailbox.
pub struct CommandInbox {
    rx: mpsc::UnboundedReceiver<Command>,
    preempt: Arc<Preempt>,
}

pub fn mailbox() -> (UnitMailbox, CommandInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let preempt = Arc::new(Preempt::default());
    (
        UnitMailbox {
            tx,
            preempt: preempt.clone(),
        },
        CommandInbox { rx, preempt },
    )
}

/// Everything a unit needs to start.
#[derive(Clone)]
pub struct UnitSpec {
    pub id: UnitId,
    pub handle: AgentHandle,
    pub auth_flow: bool,
    pub server: ServerConfig,
    pub behavior: Arc<BehaviorConfig>,
    pub accounts: Option<Arc<AccountStore>>,
}

impl UnitSpec {
    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            handle: self.handle.clone(),
            host: self.server.host.clone(),
            port: self.server.port,
            version: self.server.version.clone(),
            auth: self.server.auth,
            auth_flow: self.auth_flow,
        }
    }
}

/// Run one unit to completion.
pub async fn run_unit(
    spec: UnitSpec,
    connector: Arc<dyn Connector>,
    inbox: CommandInbox,
    reporter: Reporter,
) -> UnitExit {
    let CommandInbox { mut rx, preempt } = inbox;

    let conn = match connector.connect(&spec.connect_options()).await {
        Ok(c) => c,
        Err(e) => {
            reporter.error(format!("Connection failed: {}", e));
            return UnitExit::ConnectFailed(e.to_string());
        }
    };
    let world = conn.world;
    let mut events = conn.events;
    let mut behavior = Behavior::new(spec.behavior.clone(), reporter.clone(), preempt);
    let mut online = false;

    info!(unit = %spec.id, handle = %spec.handle, "unit connected");

    loop {
        tokio::select! {
            biased;

            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    world.quit("supervisor closed the mailbox").await;
                    return UnitExit::Clean;
                };
                debug!(unit = %spec.id, command = cmd.name(), "command");
                if let Err(e) = behavior.handle_command(world.as_ref(), cmd).await {
                    reporter.error(e.to_string());
                }
            }

            event = events.recv() => match event {
                Some(WorldEvent::Tick) => {
                    if !online {
                        continue;
                    }
                    if let Err(e) = behavior.on_tick(world.as_ref(), Instant::now()).await {
                        reporter.error(format!("Tick failed: {}", e));
                    }
                }
                Some(WorldEvent::AuthCode { verification_uri, user_code }) => {
                    reporter.send(UnitEvent::AuthLink {
                        link: verification_uri,
                        user_code,
                    });
                }
                Some(WorldEvent::Spawned { username }) => {
                    online = true;
                    info!(unit = %spec.id, %username, "spawned");
                    if let Some(accounts) = &spec.accounts {
                        if let Err(e) = accounts.record(&username).await {
                            reporter.warn(format!("Could not save account {}: {}", username, e));
                        }
                    }
                    reporter.send(UnitEvent::Authenticated { nickname: username });
                }
                Some(WorldEvent::GoalReached) => {
                    debug!(unit = %spec.id, "goal reached");
                }
                Some(WorldEvent::Kicked { reason }) => {
                    reporter.warn(format!("Kicked: {}", reason));
                }
                Some(WorldEvent::End { reason }) => {
                    reporter.warn(format!("Disconnected: {}", reason));
                    return UnitExit::ConnectionLost(reason);
                }
                None => {
                    reporter.warn("Disconnected: event stream closed");
                    return UnitExit::ConnectionLost("event stream closed".into());
                }
            }
        }
    }
}
