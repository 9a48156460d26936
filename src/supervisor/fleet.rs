//! The fleet supervisor actor.
//!
//! One task owns the identity map and every respawn timer. Everything else
//! talks to it through [`SupervisorHandle`], units report through a shared
//! event channel, and watcher tasks report exits through an internal channel.

use async_trait::async_trait;
use botfleet_agent::{AccountStore, Connector, UnitId, UnitSpec};
use botfleet_core::{
    AgentHandle, BehaviorConfig, BotSummary, Command, FleetConfig, LogLevel, RekeyPolicy,
    ServerConfig, SupervisorConfig, SurfaceCommand, SurfaceEvent, UnitEvent,
};
use botfleet_gateway::FleetControl;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::identity::IdentityMap;
use super::lifecycle::{self, UnitLink};
use super::log;
use super::types::{ExitReport, FleetRequest, Internal, UnitLookup};

const EVENT_CAPACITY: usize = 1024;

/// A running supervisor and its upward event stream.
pub struct Fleet {
    handle: SupervisorHandle,
    events: broadcast::Sender<SurfaceEvent>,
    task: JoinHandle<()>,
}

impl Fleet {
    /// Start the actor. Accounts listed in `accounts` are spawned right away.
    pub fn start(
        config: FleetConfig,
        connector: Arc<dyn Connector>,
        accounts: Option<Arc<AccountStore>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (unit_tx, unit_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            server: config.server,
            behavior: Arc::new(config.behavior),
            settings: config.supervisor,
            connector,
            accounts,
            identity: IdentityMap::new(),
            respawns: HashMap::new(),
            next_unit: 0,
            events: events.clone(),
            unit_tx,
            internal_tx,
        };
        let task = tokio::spawn(supervisor.run(req_rx, unit_rx, internal_rx));

        Self {
            handle: SupervisorHandle { tx: req_tx },
            events,
            task,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> broadcast::Sender<SurfaceEvent> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    /// Stop every unit and wait for the actor to finish.
    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(FleetRequest::Shutdown);
        if let Err(e) = self.task.await {
            warn!("supervisor task ended abnormally: {}", e);
        }
    }
}

/// Cheap, cloneable front door to the supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<FleetRequest>,
}

impl SupervisorHandle {
    fn request(&self, req: FleetRequest) {
        if self.tx.send(req).is_err() {
            debug!("supervisor stopped, request dropped");
        }
    }

    pub fn spawn(&self, handle: impl Into<AgentHandle>, auth_flow: bool) {
        self.request(FleetRequest::Spawn {
            handle: handle.into(),
            auth_flow,
        });
    }

    pub fn spawn_auth(&self) {
        self.request(FleetRequest::SpawnAuth);
    }

    pub fn send(&self, bot: impl Into<String>, command: Command) {
        self.request(FleetRequest::Command {
            bot: Some(bot.into()),
            command,
        });
    }

    pub fn broadcast(&self, command: Command) {
        self.request(FleetRequest::Command { bot: None, command });
    }

    pub fn chat(&self, message: impl Into<String>) {
        self.request(FleetRequest::Chat {
            message: message.into(),
        });
    }

    pub fn terminate_all(&self) {
        self.request(FleetRequest::TerminateAll);
    }

    pub async fn roster(&self) -> Vec<BotSummary> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetRequest::Roster { reply });
        rx.await.unwrap_or_default()
    }

    pub async fn lookup(&self, name: impl Into<String>) -> Option<UnitLookup> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetRequest::Lookup {
            name: name.into(),
            reply,
        });
        rx.await.ok().flatten()
    }
}

#[async_trait]
impl FleetControl for SupervisorHandle {
    async fn submit(&self, command: SurfaceCommand) {
        match command {
            SurfaceCommand::SpawnAuthBot => self.spawn_auth(),
            SurfaceCommand::SendCommand { bot: Some(bot), command } => self.send(bot, command),
            SurfaceCommand::SendCommand { bot: None, command } => self.broadcast(command),
            SurfaceCommand::SendChat { message } => self.chat(message),
            SurfaceCommand::DisconnectAll => self.terminate_all(),
        }
    }

    async fn roster(&self) -> Vec<BotSummary> {
        SupervisorHandle::roster(self).await
    }
}

struct Supervisor {
    server: ServerConfig,
    behavior: Arc<BehaviorConfig>,
    settings: SupervisorConfig,
    connector: Arc<dyn Connector>,
    accounts: Option<Arc<AccountStore>>,
    identity: IdentityMap<UnitLink>,
    respawns: HashMap<AgentHandle, AbortHandle>,
    next_unit: u64,
    events: broadcast::Sender<SurfaceEvent>,
    unit_tx: mpsc::UnboundedSender<(UnitId, UnitEvent)>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<FleetRequest>,
        mut unit_rx: mpsc::UnboundedReceiver<(UnitId, UnitEvent)>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        self.spawn_stored().await;
        info!(
            respawn_delay_secs = self.settings.respawn_delay_secs,
            rekey_policy = ?self.settings.rekey_policy,
            "supervisor started"
        );

        loop {
            // unit_rx before internal_rx: a unit's final events are queued
            // before its exit report.
            tokio::select! {
                biased;

                req = requests.recv() => match req {
                    Some(FleetRequest::Shutdown) | None => break,
                    Some(req) => self.handle_request(req),
                },
                Some((id, event)) = unit_rx.recv() => self.on_unit_event(id, event),
                Some(msg) = internal_rx.recv() => match msg {
                    Internal::Exited { id, report } => self.on_unit_exit(id, report),
                    Internal::RespawnDue(handle) => {
                        self.respawns.remove(&handle);
                        self.spawn(handle, false);
                    }
                },
            }
        }

        let stopped = self.terminate_all();
        info!(units = stopped, "supervisor stopped");
    }

    async fn spawn_stored(&mut self) {
        let Some(store) = self.accounts.clone() else {
            return;
        };
        match store.load().await {
            Ok(handles) => {
                info!(count = handles.len(), path = %store.path().display(), "spawning stored accounts");
                for handle in handles {
                    self.spawn(handle, false);
                }
            }
            Err(e) => warn!(path = %store.path().display(), "could not read accounts: {}", e),
        }
    }

    fn handle_request(&mut self, req: FleetRequest) {
        match req {
            FleetRequest::Spawn { handle, auth_flow } => self.spawn(handle, auth_flow),
            FleetRequest::SpawnAuth => {
                let handle = lifecycle::temp_name(&self.settings.temp_name_prefix);
                self.spawn(handle, true);
            }
            FleetRequest::Command { bot: Some(bot), command } => self.send(&bot, command),
            FleetRequest::Command { bot: None, command } => self.broadcast(command),
            FleetRequest::Chat { message } => self.broadcast(Command::Chat { message }),
            FleetRequest::TerminateAll => {
                self.terminate_all();
            }
            FleetRequest::Roster { reply } => {
                let _ = reply.send(self.roster());
            }
            FleetRequest::Lookup { name, reply } => {
                let found = self.identity.find_unit(&name).and_then(|e| {
                    self.identity.key_of(e.id).map(|key| UnitLookup {
                        id: e.id,
                        key: key.clone(),
                    })
                });
                let _ = reply.send(found);
            }
            FleetRequest::Shutdown => {}
        }
    }

    // -- lifecycle ---------------------------------------------------------

    fn spawn(&mut self, handle: AgentHandle, auth_flow: bool) {
        if self.identity.is_live(handle.as_str()) {
            info!(bot = %handle, "already running, spawn ignored");
            return;
        }
        if let Some(timer) = self.respawns.remove(&handle) {
            timer.abort();
            log::info("respawn_cancelled", &handle, None, serde_json::Value::Null);
        }

        self.next_unit += 1;
        let id = UnitId(self.next_unit);
        let spec = UnitSpec {
            id,
            handle: handle.clone(),
            auth_flow,
            server: self.server.clone(),
            behavior: self.behavior.clone(),
            accounts: self.accounts.clone(),
        };
        let link = lifecycle::launch(
            spec,
            self.connector.clone(),
            self.unit_tx.clone(),
            self.internal_tx.clone(),
        );

        if let Err(e) = self.identity.register(handle.clone(), id, auth_flow, link) {
            // Unreachable after the is_live check above.
            warn!(bot = %handle, "register failed: {}", e);
            return;
        }
        info!(bot = %handle, unit = %id, auth_flow, "unit spawned");
        log::info(
            "unit_spawned",
            &handle,
            Some(id),
            serde_json::json!({ "auth_flow": auth_flow }),
        );
    }

    fn on_unit_exit(&mut self, id: UnitId, report: ExitReport) {
        let Some(entry) = self.identity.remove(id) else {
            debug!(unit = %id, "exit from untracked unit");
            return;
        };
        let name = entry.display_name().clone();
        let respawn = report.is_abnormal() && !entry.auth_flow;

        info!(bot = %name, unit = %id, code = report.code(), "unit exited: {}", report.reason());
        let data = serde_json::json!({
            "code": report.code(),
            "reason": report.reason(),
            "respawn": respawn,
        });
        if report.is_abnormal() {
            log::warn("unit_exited", &name, Some(id), data);
        } else {
            log::info("unit_exited", &name, Some(id), data);
        }

        self.emit(SurfaceEvent::BotOffline {
            username: name.to_string(),
        });

        if respawn {
            let timer = lifecycle::schedule_respawn(
                entry.initial.clone(),
                self.settings.respawn_delay(),
                self.internal_tx.clone(),
            );
            if let Some(old) = self.respawns.insert(entry.initial, timer) {
                old.abort();
            }
        }
    }

    /// Abort every live unit and every pending respawn. Exit cleanup runs
    /// when each watcher reports back.
    fn terminate_all(&mut self) -> usize {
        for (handle, timer) in self.respawns.drain() {
            timer.abort();
            log::info("respawn_cancelled", &handle, None, serde_json::Value::Null);
        }
        let entries = self.identity.in_order();
        for entry in &entries {
            entry.link.abort.abort();
        }
        info!(units = entries.len(), "terminating all units");
        entries.len()
    }

    // -- unit → surface ----------------------------------------------------

    fn on_unit_event(&mut self, id: UnitId, event: UnitEvent) {
        let Some(entry) = self.identity.get_mut(id) else {
            debug!(unit = %id, "event from untracked unit dropped");
            return;
        };
        let name = entry.display_name().to_string();

        match event {
            UnitEvent::AuthLink { link, user_code } => {
                info!(bot = %name, %link, %user_code, "device-code login pending");
                self.emit(SurfaceEvent::AuthLink {
                    link,
                    user_code,
                    username: name,
                });
            }
            UnitEvent::Authenticated { nickname } => self.on_authenticated(id, nickname),
            UnitEvent::StatusUpdate { status } => {
                entry.status = status.clone();
                self.emit(SurfaceEvent::BotStatusUpdate {
                    username: name,
                    status,
                });
            }
            UnitEvent::Log { text, level } => self.emit(SurfaceEvent::log(name, text, level)),
            UnitEvent::Error { text } => self.emit(SurfaceEvent::log(name, text, LogLevel::Error)),
        }
    }

    fn on_authenticated(&mut self, id: UnitId, nickname: String) {
        let final_handle = AgentHandle::new(nickname);
        let Some(entry) = self.identity.get_mut(id) else {
            return;
        };
        let initial = entry.initial.clone();
        let auth_flow = entry.auth_flow;
        entry.final_handle = Some(final_handle.clone());
        entry.status = "Online".into();

        let rekey = auth_flow || self.settings.rekey_policy == RekeyPolicy::Always;
        if rekey && final_handle != initial {
            match self.identity.rekey(id, final_handle.clone()) {
                Ok(()) => log::info(
                    "unit_rekeyed",
                    &final_handle,
                    Some(id),
                    serde_json::json!({ "from": initial.as_str() }),
                ),
                Err(e) => {
                    warn!(bot = %initial, "cannot re-key to {}: {}", final_handle, e);
                    log::warn(
                        "rekey_refused",
                        &initial,
                        Some(id),
                        serde_json::json!({ "to": final_handle.as_str(), "error": e.to_string() }),
                    );
                }
            }
        }

        info!(bot = %final_handle, unit = %id, from = %initial, "authenticated");
        if final_handle != initial {
            self.emit(SurfaceEvent::BotAuthenticated {
                temp_username: initial.to_string(),
                final_username: final_handle.to_string(),
            });
        }
        self.emit(SurfaceEvent::BotOnline {
            username: final_handle.to_string(),
            status: "Online".into(),
        });
    }

    // -- surface → units ---------------------------------------------------

    fn send(&self, bot: &str, command: Command) {
        match self.identity.find_unit(bot) {
            Some(entry) => {
                debug!(bot, command = command.name(), "command");
                if !entry.link.mailbox.send(command) {
                    debug!(bot, "unit mailbox closed");
                }
            }
            None => warn!(bot, command = command.name(), "command for unknown bot"),
        }
    }

    /// Deliver to every live unit in spawn order. A sweep gives unit `i` of
    /// `n` the angle `2πi/n`.
    fn broadcast(&self, command: Command) {
        let entries = self.identity.in_order();
        let n = entries.len();
        debug!(command = command.name(), units = n, "broadcast");
        for (i, entry) in entries.into_iter().enumerate() {
            let cmd = match &command {
                Command::Clearmap { .. } => Command::Clearmap {
                    angle: TAU * i as f64 / n as f64,
                },
                other => other.clone(),
            };
            entry.link.mailbox.send(cmd);
        }
    }

    fn roster(&self) -> Vec<BotSummary> {
        self.identity
            .in_order()
            .into_iter()
            .map(|e| BotSummary {
                username: e.display_name().to_string(),
                status: e.status.clone(),
                auth_flow: e.auth_flow,
            })
            .collect()
    }

    fn emit(&self, event: SurfaceEvent) {
        // No subscribers is fine: nobody is watching.
        let _ = self.events.send(event);
    }
}
