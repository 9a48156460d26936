//! Enclosure planner for trap mode.
//!
//! The offset set is built once and shared by every unit. Offsets are ordered
//! so each layer rests on the one before it: floor, lower wall, upper wall,
//! roof, with each square's center after its ring.

use crate::state::BehaviorState;
use crate::world::{ActionError, GameWorld, Goal};
use botfleet_core::{BehaviorConfig, BlockPos, Vec3, FACES};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetRole {
    Floor,
    Wall,
    Roof,
}

/// Relative positions of an enclosure around a standing player whose feet
/// are at the origin.
#[derive(Debug, Clone)]
pub struct TrapOffsets {
    offsets: Vec<(OffsetRole, BlockPos)>,
}

const RING: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

pub static TRAP_OFFSETS: LazyLock<TrapOffsets> = LazyLock::new(TrapOffsets::build);

impl TrapOffsets {
    fn build() -> Self {
        let ring = |y: i32| RING.iter().map(move |&(x, z)| BlockPos::new(x, y, z));
        let mut offsets = Vec::with_capacity(34);

        offsets.extend(ring(-1).map(|p| (OffsetRole::Floor, p)));
        offsets.push((OffsetRole::Floor, BlockPos::new(0, -1, 0)));
        offsets.extend(ring(0).map(|p| (OffsetRole::Wall, p)));
        offsets.extend(ring(1).map(|p| (OffsetRole::Wall, p)));
        offsets.extend(ring(2).map(|p| (OffsetRole::Roof, p)));
        offsets.push((OffsetRole::Roof, BlockPos::new(0, 2, 0)));

        Self { offsets }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(OffsetRole, BlockPos)> {
        self.offsets.iter()
    }

    pub fn with_role(&self, role: OffsetRole) -> impl Iterator<Item = BlockPos> + '_ {
        self.offsets
            .iter()
            .filter(move |(r, _)| *r == role)
            .map(|(_, p)| *p)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub placed: usize,
    pub failed: usize,
    /// Offsets already filled, or with no solid neighbor to build against.
    pub skipped: usize,
    /// A preempting command arrived mid-build; remaining offsets were dropped.
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Another build holds the guard.
    Busy,
    /// Too far from the target; navigation goal set, nothing built.
    Approaching,
    /// Could not get building material in hand.
    NoMaterial(ActionError),
    Built(BuildReport),
}

/// Run one planning pass around `target`.
pub async fn run_planner(
    world: &dyn GameWorld,
    state: &mut BehaviorState,
    target: Vec3,
    config: &BehaviorConfig,
    cancel: &CancellationToken,
) -> BuildOutcome {
    if state.is_building() {
        return BuildOutcome::Busy;
    }
    if world.position().distance_to(target) > config.build_range {
        world.set_goal(Some(Goal::Near {
            pos: target,
            range: 1.0,
        }));
        return BuildOutcome::Approaching;
    }
    if !state.begin_build() {
        return BuildOutcome::Busy;
    }

    world.set_goal(None);
    if let Err(e) = acquire_material(world, config).await {
        state.end_build();
        return BuildOutcome::NoMaterial(e);
    }

    let origin = target.block();
    let mut report = BuildReport::default();
    for (_, offset) in TRAP_OFFSETS.iter() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match fill(world, origin + *offset).await {
            Ok(true) => report.placed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                debug!(pos = %(origin + *offset), "place failed: {}", e);
                report.failed += 1;
            }
        }
    }

    state.end_build();
    info!(
        placed = report.placed,
        failed = report.failed,
        skipped = report.skipped,
        "trap pass done around {}",
        origin
    );
    BuildOutcome::Built(report)
}

/// Get one unit of the building material in hand, asking the server for a
/// grant when the agent has none and is allowed to.
async fn acquire_material(world: &dyn GameWorld, config: &BehaviorConfig) -> Result<(), ActionError> {
    let material = config.building_material.as_str();
    if world.item_count(material) == 0 {
        if !world.is_operator() {
            return Err(ActionError::MissingItem(material.to_string()));
        }
        world.request_supply(material, config.supply_amount).await?;
        if world.item_count(material) == 0 {
            return Err(ActionError::MissingItem(material.to_string()));
        }
    }
    world.equip(material).await
}

/// Fill `pos` against its first solid neighbor. `Ok(false)` means there was
/// nothing to do: the cell is occupied, unloaded, or floating.
async fn fill(world: &dyn GameWorld, pos: BlockPos) -> Result<bool, ActionError> {
    match world.block_at(pos) {
        Some(b) if b.is_empty() => {}
        _ => return Ok(false),
    }
    for face in FACES {
        let against = pos + face;
        if world.block_at(against).is_some_and(|b| b.is_solid()) {
            world.place_block(against, pos - against).await?;
            return Ok(true);
        }
    }
    Ok(false)
}
