//! Per-unit behavior state.
//!
//! Fields are private; the command and tick handlers move the state only
//! through the transition methods below.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    None,
    Follow,
    Grief,
    Trap,
    Clearmap,
}

impl Mode {
    /// Progressive verb used in status lines ("Following Bob").
    pub fn verb(&self) -> &'static str {
        match self {
            Self::None => "Idle",
            Self::Follow => "Following",
            Self::Grief => "Griefing",
            Self::Trap => "Trapping",
            Self::Clearmap => "Clearing map",
        }
    }

    pub fn needs_target(&self) -> bool {
        matches!(self, Self::Follow | Self::Grief | Self::Trap)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Follow => write!(f, "follow"),
            Self::Grief => write!(f, "grief"),
            Self::Trap => write!(f, "trap"),
            Self::Clearmap => write!(f, "clearmap"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorState {
    mode: Mode,
    target: Option<String>,
    last_action: Option<Instant>,
    angle: f64,
    building: bool,
}

impl BehaviorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    pub fn last_action(&self) -> Option<Instant> {
        self.last_action
    }

    pub fn is_idle(&self) -> bool {
        self.mode == Mode::None
    }

    /// Back to idle. The action timestamp survives so a reset cannot be used
    /// to dodge the rate limit.
    pub fn reset(&mut self) {
        self.mode = Mode::None;
        self.target = None;
        self.angle = 0.0;
        self.building = false;
    }

    /// Enter a targeted mode.
    pub fn engage(&mut self, mode: Mode, target: impl Into<String>) {
        debug_assert!(mode.needs_target());
        self.mode = mode;
        self.target = Some(target.into());
    }

    pub fn sweep(&mut self, angle: f64) {
        self.mode = Mode::Clearmap;
        self.target = None;
        self.angle = angle;
    }

    /// Take the building guard. Returns false if a build is already running.
    pub fn begin_build(&mut self) -> bool {
        if self.building {
            return false;
        }
        self.building = true;
        true
    }

    pub fn end_build(&mut self) {
        self.building = false;
    }

    /// Whether `interval` has passed since the last recorded action.
    pub fn action_ready(&self, now: Instant, interval: Duration) -> bool {
        match self.last_action {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }

    pub fn mark_action(&mut self, now: Instant) {
        self.last_action = Some(now);
    }
}
