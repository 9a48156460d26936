//! In-memory world and connector.
//!
//! `SimWorld` models a flat world (bedrock at y=0, stone up to the ground
//! layer, grass on top) with per-block overrides, visible players, a trivial
//! straight-line navigator, and an inventory. `SimConnector` hands out one
//! `SimWorld` per connection and lets callers inject world events.

use crate::world::{ActionError, ConnectOptions, Connection, Connector, GameWorld, Goal, WorldEvent};
use botfleet_core::{Block, BlockPos, Vec3};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_GROUND_Y: i32 = 63;
const EVENT_BUFFER: usize = 256;

#[derive(Debug)]
struct SimState {
    position: Vec3,
    ground_y: i32,
    blocks: HashMap<BlockPos, String>,
    players: HashMap<String, Vec3>,
    goal: Option<Goal>,
    goals_set: usize,
    inventory: HashMap<String, u32>,
    held: Option<String>,
    operator: bool,
    reach: f64,
    speed: f64,
    failing: bool,
    closed: bool,
    dug: Vec<BlockPos>,
    placed: Vec<BlockPos>,
    chat: Vec<String>,
}

pub struct SimWorld {
    state: Mutex<SimState>,
    events: Option<mpsc::Sender<WorldEvent>>,
}

impl SimWorld {
    /// World wired to an event channel (for `GoalReached` and `End`).
    pub fn new(events: mpsc::Sender<WorldEvent>) -> Self {
        Self::build(Some(events))
    }

    /// World with nowhere to send events; for driving a `Behavior` directly.
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(events: Option<mpsc::Sender<WorldEvent>>) -> Self {
        Self {
            state: Mutex::new(SimState {
                position: Vec3::new(0.5, (DEFAULT_GROUND_Y + 1) as f64, 0.5),
                ground_y: DEFAULT_GROUND_Y,
                blocks: HashMap::new(),
                players: HashMap::new(),
                goal: None,
                goals_set: 0,
                inventory: HashMap::new(),
                held: None,
                operator: false,
                reach: 6.0,
                speed: 4.0,
                failing: false,
                closed: false,
                dug: Vec::new(),
                placed: Vec::new(),
                chat: Vec::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -- setup -------------------------------------------------------------

    pub fn set_position(&self, pos: Vec3) {
        self.lock().position = pos;
    }

    pub fn ground_y(&self) -> i32 {
        self.lock().ground_y
    }

    pub fn add_player(&self, name: &str, pos: Vec3) {
        self.lock().players.insert(name.to_string(), pos);
    }

    pub fn remove_player(&self, name: &str) {
        self.lock().players.remove(name);
    }

    pub fn set_block(&self, pos: BlockPos, name: &str) {
        self.lock().blocks.insert(pos, name.to_string());
    }

    /// Set every block in the inclusive box `from..=to`.
    pub fn fill(&self, from: BlockPos, to: BlockPos, name: &str) {
        let mut s = self.lock();
        for x in from.x.min(to.x)..=from.x.max(to.x) {
            for y in from.y.min(to.y)..=from.y.max(to.y) {
                for z in from.z.min(to.z)..=from.z.max(to.z) {
                    s.blocks.insert(BlockPos::new(x, y, z), name.to_string());
                }
            }
        }
    }

    pub fn set_operator(&self, op: bool) {
        self.lock().operator = op;
    }

    pub fn give(&self, item: &str, count: u32) {
        *self.lock().inventory.entry(item.to_string()).or_insert(0) += count;
    }

    /// Make every dig and place attempt fail with `Rejected`.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    // -- inspection --------------------------------------------------------

    pub fn goal(&self) -> Option<Goal> {
        self.lock().goal.clone()
    }

    /// Number of times a non-empty goal was set.
    pub fn goals_set(&self) -> usize {
        self.lock().goals_set
    }

    pub fn dug(&self) -> Vec<BlockPos> {
        self.lock().dug.clone()
    }

    pub fn placed(&self) -> Vec<BlockPos> {
        self.lock().placed.clone()
    }

    pub fn chat_log(&self) -> Vec<String> {
        self.lock().chat.clone()
    }

    pub fn held(&self) -> Option<String> {
        self.lock().held.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Advance the navigator one step towards the current goal.
    pub fn step(&self) {
        let reached = {
            let mut s = self.lock();
            let Some(goal) = s.goal.clone() else {
                return;
            };
            let (tx, tz, range) = match goal {
                Goal::Near { pos, range } => (pos.x, pos.z, range),
                Goal::Xz { x, z } => (x, z, 0.5),
            };
            let dx = tx - s.position.x;
            let dz = tz - s.position.z;
            let dist = (dx * dx + dz * dz).sqrt();
            if dist <= range {
                s.goal = None;
                true
            } else {
                let step = s.speed.min(dist - range);
                s.position.x += dx / dist * step;
                s.position.z += dz / dist * step;
                false
            }
        };
        if reached {
            self.emit(WorldEvent::GoalReached);
        }
    }

    fn emit(&self, event: WorldEvent) {
        if let Some(tx) = &self.events {
            if tx.try_send(event).is_err() {
                debug!("sim event dropped");
            }
        }
    }

    fn close(&self, reason: &str) {
        let was_open = {
            let mut s = self.lock();
            !std::mem::replace(&mut s.closed, true)
        };
        if was_open {
            self.emit(WorldEvent::End {
                reason: reason.to_string(),
            });
        }
    }
}

impl SimState {
    fn block(&self, pos: BlockPos) -> Block {
        if let Some(name) = self.blocks.get(&pos) {
            return Block::new(name.clone());
        }
        let name = if pos.y <= 0 {
            "bedrock"
        } else if pos.y < self.ground_y {
            "stone"
        } else if pos.y == self.ground_y {
            "grass_block"
        } else {
            "air"
        };
        Block::new(name)
    }

    fn check_open(&self) -> Result<(), ActionError> {
        if self.closed {
            Err(ActionError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn check_reach(&self, pos: BlockPos) -> Result<(), ActionError> {
        if self.position.distance_to(pos.center()) > self.reach {
            Err(ActionError::OutOfReach(pos))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl GameWorld for SimWorld {
    fn position(&self) -> Vec3 {
        self.lock().position
    }

    fn player_position(&self, name: &str) -> Option<Vec3> {
        self.lock().players.get(name).copied()
    }

    fn block_at(&self, pos: BlockPos) -> Option<Block> {
        Some(self.lock().block(pos))
    }

    fn set_goal(&self, goal: Option<Goal>) {
        let mut s = self.lock();
        if goal.is_some() {
            s.goals_set += 1;
        }
        s.goal = goal;
    }

    fn is_navigating(&self) -> bool {
        self.lock().goal.is_some()
    }

    fn item_count(&self, item: &str) -> u32 {
        self.lock().inventory.get(item).copied().unwrap_or(0)
    }

    fn is_operator(&self) -> bool {
        self.lock().operator
    }

    async fn look_at(&self, _pos: Vec3) -> Result<(), ActionError> {
        self.lock().check_open()
    }

    async fn dig(&self, pos: BlockPos) -> Result<(), ActionError> {
        let mut s = self.lock();
        s.check_open()?;
        if s.failing {
            return Err(ActionError::Rejected("dig refused".into()));
        }
        s.check_reach(pos)?;
        let block = s.block(pos);
        if block.is_empty() {
            return Err(ActionError::Rejected(format!("nothing to dig at {}", pos)));
        }
        if block.name == "bedrock" {
            return Err(ActionError::Undiggable(block.name));
        }
        s.blocks.insert(pos, "air".into());
        s.dug.push(pos);
        Ok(())
    }

    async fn equip(&self, item: &str) -> Result<(), ActionError> {
        let mut s = self.lock();
        s.check_open()?;
        if s.inventory.get(item).copied().unwrap_or(0) == 0 {
            return Err(ActionError::MissingItem(item.to_string()));
        }
        s.held = Some(item.to_string());
        Ok(())
    }

    async fn place_block(&self, against: BlockPos, face: BlockPos) -> Result<(), ActionError> {
        let mut s = self.lock();
        s.check_open()?;
        if s.failing {
            return Err(ActionError::Rejected("place refused".into()));
        }
        let target = against + face;
        s.check_reach(target)?;
        if !s.block(against).is_solid() {
            return Err(ActionError::Rejected(format!("nothing to place against at {}", against)));
        }
        if !s.block(target).is_empty() {
            return Err(ActionError::Rejected(format!("{} is occupied", target)));
        }
        let Some(item) = s.held.clone() else {
            return Err(ActionError::Rejected("empty hand".into()));
        };
        let count = s.inventory.entry(item.clone()).or_insert(0);
        if *count == 0 {
            return Err(ActionError::MissingItem(item));
        }
        *count -= 1;
        s.blocks.insert(target, item);
        s.placed.push(target);
        Ok(())
    }

    async fn chat(&self, message: &str) -> Result<(), ActionError> {
        let mut s = self.lock();
        s.check_open()?;
        s.chat.push(message.to_string());
        Ok(())
    }

    async fn request_supply(&self, item: &str, count: u32) -> Result<(), ActionError> {
        let mut s = self.lock();
        s.check_open()?;
        if !s.operator {
            return Err(ActionError::Rejected("not an operator".into()));
        }
        s.chat.push(format!("/give @s {} {}", item, count));
        *s.inventory.entry(item.to_string()).or_insert(0) += count;
        Ok(())
    }

    async fn quit(&self, reason: &str) {
        self.close(reason);
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

type SetupFn = Box<dyn Fn(&SimWorld) + Send + Sync>;
type RenameFn = Box<dyn Fn(&str) -> String + Send + Sync>;

struct SimLink {
    world: Arc<SimWorld>,
    events: mpsc::Sender<WorldEvent>,
}

/// Connector that produces `SimWorld`s. Links are indexed by the handle the
/// unit connected with.
pub struct SimConnector {
    tick_interval: Option<Duration>,
    auth_names: Mutex<VecDeque<String>>,
    counter: AtomicU64,
    refused: Mutex<HashSet<String>>,
    setup: Option<SetupFn>,
    rename: Option<RenameFn>,
    links: Mutex<HashMap<String, SimLink>>,
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimConnector {
    /// Connector without a ticker; ticks are injected with [`SimConnector::tick`].
    pub fn new() -> Self {
        Self {
            tick_interval: None,
            auth_names: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
            refused: Mutex::new(HashSet::new()),
            setup: None,
            rename: None,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Drive every world with its own ticker and navigator.
    pub fn with_ticks(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Final names handed out to device-code logins, in order. Once exhausted,
    /// names fall back to `Player<n>`.
    pub fn with_auth_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        locked(&self.auth_names).extend(names.into_iter().map(Into::into));
        self
    }

    /// Run `f` on every world before its first event.
    pub fn with_setup(mut self, f: impl Fn(&SimWorld) + Send + Sync + 'static) -> Self {
        self.setup = Some(Box::new(f));
        self
    }

    /// Server-side spelling of stored-account logins, e.g. case normalization.
    pub fn with_rename(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.rename = Some(Box::new(f));
        self
    }

    pub fn refuse(&self, handle: &str) {
        locked(&self.refused).insert(handle.to_string());
    }

    pub fn allow(&self, handle: &str) {
        locked(&self.refused).remove(handle);
    }

    pub fn world(&self, handle: &str) -> Option<Arc<SimWorld>> {
        locked(&self.links).get(handle).map(|l| l.world.clone())
    }

    pub fn connections(&self) -> usize {
        self.counter.load(Ordering::SeqCst) as usize
    }

    /// Inject one tick. Returns false if there is no open link.
    pub fn tick(&self, handle: &str) -> bool {
        self.inject(handle, WorldEvent::Tick)
    }

    pub fn inject(&self, handle: &str, event: WorldEvent) -> bool {
        match locked(&self.links).get(handle) {
            Some(link) => link.events.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Server-side disconnect.
    pub fn drop_connection(&self, handle: &str, reason: &str) {
        if let Some(world) = self.world(handle) {
            world.close(reason);
        }
    }

    fn next_auth_name(&self) -> String {
        if let Some(name) = locked(&self.auth_names).pop_front() {
            return name;
        }
        format!("Player{}", self.counter.load(Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl Connector for SimConnector {
    async fn connect(&self, options: &ConnectOptions) -> botfleet_core::Result<Connection> {
        let handle = options.handle.as_str();
        if locked(&self.refused).contains(handle) {
            return Err(botfleet_core::Error::connect_failed(handle, "connection refused"));
        }
        self.counter.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let world = Arc::new(SimWorld::new(tx.clone()));
        if let Some(setup) = &self.setup {
            setup(&world);
        }

        let username = if options.auth_flow {
            let code = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
            let _ = tx
                .send(WorldEvent::AuthCode {
                    verification_uri: "https://www.microsoft.com/link".into(),
                    user_code: code,
                })
                .await;
            self.next_auth_name()
        } else {
            match &self.rename {
                Some(rename) => rename(handle),
                None => handle.to_string(),
            }
        };
        let _ = tx.send(WorldEvent::Spawned { username }).await;

        if let Some(interval) = self.tick_interval {
            let world = world.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if world.is_closed() {
                        break;
                    }
                    world.step();
                    if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(WorldEvent::Tick) {
                        break;
                    }
                }
            });
        }

        locked(&self.links).insert(
            handle.to_string(),
            SimLink {
                world: world.clone(),
                events: tx,
            },
        );

        Ok(Connection { world, events: rx })
    }
}
