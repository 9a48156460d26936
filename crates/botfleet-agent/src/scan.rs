//! Target acquisition: pick the nearest breakable block around a reference
//! point and clear it, at most once per action interval.

use crate::state::BehaviorState;
use crate::world::{ActionError, GameWorld};
use botfleet_core::{BehaviorConfig, BlockPos, Vec3};
use std::time::Instant;
use tracing::debug;

/// A block the scanner may act on, with its distance from the agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub pos: BlockPos,
    pub distance: f64,
}

/// Every actionable block in the cube of half-width `scan_radius` around
/// `reference`, nearest to `agent` first.
pub fn find_candidates(
    world: &dyn GameWorld,
    reference: Vec3,
    agent: Vec3,
    config: &BehaviorConfig,
) -> Vec<Candidate> {
    let center = reference.block();
    let r = config.scan_radius.max(0);
    let mut out = Vec::new();

    for dx in -r..=r {
        for dy in -r..=r {
            for dz in -r..=r {
                let pos = center + BlockPos::new(dx, dy, dz);
                let distance = agent.distance_to(pos.center());
                if distance > config.max_action_distance {
                    continue;
                }
                let Some(block) = world.block_at(pos) else {
                    continue;
                };
                if block.is_empty() || config.is_protected(&block.name) {
                    continue;
                }
                out.push(Candidate { pos, distance });
            }
        }
    }

    out.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.pos.cmp(&b.pos))
    });
    out
}

pub fn select_target(
    world: &dyn GameWorld,
    reference: Vec3,
    agent: Vec3,
    config: &BehaviorConfig,
) -> Option<BlockPos> {
    find_candidates(world, reference, agent, config)
        .first()
        .map(|c| c.pos)
}

/// One scan-and-act step. Returns the block acted on, if any.
///
/// Look and dig failures are swallowed; only a lost connection is reported
/// back to the caller.
pub async fn scan_and_act(
    world: &dyn GameWorld,
    state: &mut BehaviorState,
    reference: Vec3,
    config: &BehaviorConfig,
    now: Instant,
) -> Result<Option<BlockPos>, ActionError> {
    if !state.action_ready(now, config.action_interval()) {
        return Ok(None);
    }

    let Some(pos) = select_target(world, reference, world.position(), config) else {
        return Ok(None);
    };
    state.mark_action(now);

    if let Err(e) = world.look_at(pos.center()).await {
        if e == ActionError::Disconnected {
            return Err(e);
        }
        debug!(%pos, "look failed: {}", e);
    }
    match world.dig(pos).await {
        Ok(()) => Ok(Some(pos)),
        Err(ActionError::Disconnected) => Err(ActionError::Disconnected),
        Err(e) => {
            debug!(%pos, "dig failed: {}", e);
            Ok(Some(pos))
        }
    }
}
