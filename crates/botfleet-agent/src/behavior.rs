//! Behavior state machine: command handler plus per-tick driver.
//!
//! Both entry points run on the unit's own task, so they never overlap for
//! the same unit. Neither lets an action failure escape as a panic; the worst
//! case is a `UnitError` that the unit loop reports upward.

use crate::report::Reporter;
use crate::scan;
use crate::state::{BehaviorState, Mode};
use crate::structure::{self, BuildOutcome};
use crate::unit::Preempt;
use crate::world::{ActionError, GameWorld, Goal};
use botfleet_core::{BehaviorConfig, Command, Vec3};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("{action} failed: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: ActionError,
    },
}

impl UnitError {
    fn action(action: &'static str, source: ActionError) -> Self {
        Self::Action { action, source }
    }
}

pub struct Behavior {
    state: BehaviorState,
    config: Arc<BehaviorConfig>,
    reporter: Reporter,
    preempt: Arc<Preempt>,
}

impl Behavior {
    pub fn new(config: Arc<BehaviorConfig>, reporter: Reporter, preempt: Arc<Preempt>) -> Self {
        Self {
            state: BehaviorState::new(),
            config,
            reporter,
            preempt,
        }
    }

    pub fn state(&self) -> &BehaviorState {
        &self.state
    }

    pub async fn handle_command(
        &mut self,
        world: &dyn GameWorld,
        command: Command,
    ) -> Result<(), UnitError> {
        match command {
            Command::Follow { target } => self.engage(world, Mode::Follow, target),
            Command::Grief { target } => self.engage(world, Mode::Grief, target),
            Command::Trap { target } => self.engage(world, Mode::Trap, target),
            Command::Clearmap { angle } => {
                self.go_idle(world);
                self.state.sweep(angle);
                self.reporter.status(Mode::Clearmap.verb());
            }
            Command::Stop => {
                self.go_idle(world);
                self.reporter.status("Idle");
            }
            Command::Chat { message } => {
                world
                    .chat(&message)
                    .await
                    .map_err(|e| UnitError::action("chat", e))?;
            }
        }
        Ok(())
    }

    pub async fn on_tick(&mut self, world: &dyn GameWorld, now: Instant) -> Result<(), UnitError> {
        let mode = self.state.mode();
        match mode {
            Mode::None => Ok(()),
            Mode::Clearmap => {
                self.sweep_tick(world);
                Ok(())
            }
            Mode::Follow | Mode::Grief | Mode::Trap => {
                let Some(target) = self.state.target().map(str::to_string) else {
                    self.lose_target(world, "no target");
                    return Ok(());
                };
                let Some(pos) = world.player_position(&target) else {
                    self.lose_target(world, &format!("Lost sight of {}", target));
                    return Ok(());
                };
                match mode {
                    Mode::Follow => {
                        world.set_goal(Some(Goal::Near {
                            pos,
                            range: self.config.follow_range,
                        }));
                        Ok(())
                    }
                    Mode::Grief => self.grief_tick(world, pos, now).await,
                    _ => {
                        self.trap_tick(world, &target, pos).await;
                        Ok(())
                    }
                }
            }
        }
    }

    fn engage(&mut self, world: &dyn GameWorld, mode: Mode, target: String) {
        if world.player_position(&target).is_none() {
            self.reporter
                .warn(format!("Cannot {} {}: player not visible", mode, target));
            return;
        }
        self.go_idle(world);
        self.state.engage(mode, target.clone());
        self.reporter.status(format!("{} {}", mode.verb(), target));
    }

    /// Reset to idle and cancel navigation.
    fn go_idle(&mut self, world: &dyn GameWorld) {
        self.state.reset();
        world.set_goal(None);
    }

    fn lose_target(&mut self, world: &dyn GameWorld, reason: &str) {
        self.reporter.info(reason);
        self.go_idle(world);
        self.reporter.status("Idle");
    }

    fn sweep_tick(&mut self, world: &dyn GameWorld) {
        if world.is_navigating() {
            return;
        }
        let here = world.position();
        let angle = self.state.angle();
        let d = self.config.sweep_distance;
        world.set_goal(Some(Goal::Xz {
            x: here.x + angle.cos() * d,
            z: here.z + angle.sin() * d,
        }));
    }

    async fn grief_tick(
        &mut self,
        world: &dyn GameWorld,
        target: Vec3,
        now: Instant,
    ) -> Result<(), UnitError> {
        world.set_goal(Some(Goal::Near {
            pos: target,
            range: self.config.strike_range,
        }));
        scan::scan_and_act(world, &mut self.state, target, &self.config, now)
            .await
            .map_err(|e| UnitError::action("dig", e))?;
        Ok(())
    }

    async fn trap_tick(&mut self, world: &dyn GameWorld, target: &str, pos: Vec3) {
        let cancel = self.preempt.token();
        match structure::run_planner(world, &mut self.state, pos, &self.config, &cancel).await {
            BuildOutcome::Busy | BuildOutcome::Approaching => {}
            BuildOutcome::NoMaterial(e) => {
                self.reporter.warn(format!("Cannot trap {}: {}", target, e));
                self.go_idle(world);
                self.reporter.status("Idle");
            }
            BuildOutcome::Built(report) if report.cancelled => {}
            BuildOutcome::Built(report) => {
                self.reporter.info(format!(
                    "Trapped {} ({} placed, {} failed)",
                    target, report.placed, report.failed
                ));
                self.state.engage(Mode::Follow, target);
                self.reporter.status(format!("{} {}", Mode::Follow.verb(), target));
            }
        }
    }
}
