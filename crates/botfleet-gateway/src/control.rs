use async_trait::async_trait;
use botfleet_core::{BotSummary, SurfaceCommand};

/// What the gateway needs from the fleet: a place to drop downward requests
/// and a roster snapshot for new clients.
#[async_trait]
pub trait FleetControl: Send + Sync {
    async fn submit(&self, command: SurfaceCommand);
    async fn roster(&self) -> Vec<BotSummary>;
}
