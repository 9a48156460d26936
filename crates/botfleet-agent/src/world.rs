//! Remote world contract
//!
//! A unit never talks to the game protocol directly. It goes through a
//! [`GameWorld`] for queries and actions and reads [`WorldEvent`]s from the
//! channel returned by a [`Connector`].

use botfleet_core::{AgentHandle, AuthMode, Block, BlockPos, Vec3};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Navigation target handed to the connection's pathfinder.
#[derive(Debug, Clone, PartialEq)]
pub enum Goal {
    /// Get within `range` of `pos`.
    Near { pos: Vec3, range: f64 },
    /// Reach the column at (x, z), any height.
    Xz { x: f64, z: f64 },
}

/// Events produced by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// Device-code login is waiting on the user.
    AuthCode {
        verification_uri: String,
        user_code: String,
    },
    /// Logged in and spawned; `username` is the server-assigned name.
    Spawned { username: String },
    /// One simulation step. Connections may drop ticks while the unit is busy.
    Tick,
    GoalReached,
    Kicked { reason: String },
    /// The connection is gone. No further events follow.
    End { reason: String },
}

/// A single remote action that did not go through.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("out of reach: {0}")]
    OutOfReach(BlockPos),

    #[error("cannot dig {0}")]
    Undiggable(String),

    #[error("no {0} in inventory")]
    MissingItem(String),

    #[error("action rejected: {0}")]
    Rejected(String),

    #[error("disconnected")]
    Disconnected,
}

/// Queries and primitive actions on one connection.
///
/// Query methods read the client's local view of the world and never wait on
/// the server. Async methods wait for the server to acknowledge the action.
#[async_trait::async_trait]
pub trait GameWorld: Send + Sync {
    fn position(&self) -> Vec3;
    /// Position of a player the agent can currently see.
    fn player_position(&self, name: &str) -> Option<Vec3>;
    /// `None` when the chunk holding `pos` is not loaded.
    fn block_at(&self, pos: BlockPos) -> Option<Block>;
    /// Replace the navigation goal; `None` stops navigation.
    fn set_goal(&self, goal: Option<Goal>);
    fn is_navigating(&self) -> bool;
    fn item_count(&self, item: &str) -> u32;
    /// Whether the agent may use privileged server commands.
    fn is_operator(&self) -> bool;

    async fn look_at(&self, pos: Vec3) -> Result<(), ActionError>;
    async fn dig(&self, pos: BlockPos) -> Result<(), ActionError>;
    async fn equip(&self, item: &str) -> Result<(), ActionError>;
    /// Place the held block on `face` of the block at `against`.
    async fn place_block(&self, against: BlockPos, face: BlockPos) -> Result<(), ActionError>;
    async fn chat(&self, message: &str) -> Result<(), ActionError>;
    /// Ask the server to grant `count` of `item`. Requires operator rights.
    async fn request_supply(&self, item: &str, count: u32) -> Result<(), ActionError>;
    async fn quit(&self, reason: &str);
}

/// A live connection: action surface plus its event stream.
pub struct Connection {
    pub world: Arc<dyn GameWorld>,
    pub events: mpsc::Receiver<WorldEvent>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub handle: AgentHandle,
    pub host: String,
    pub port: u16,
    pub version: Option<String>,
    pub auth: AuthMode,
    /// Started from the control surface's device-code login button.
    pub auth_flow: bool,
}

/// Opens connections to the remote world.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> botfleet_core::Result<Connection>;
}
