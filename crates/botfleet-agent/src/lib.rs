//! Botfleet Agent - per-agent behavior engine and execution unit runtime

pub mod accounts;
pub mod behavior;
pub mod report;
pub mod scan;
pub mod sim;
pub mod state;
pub mod structure;
pub mod unit;
pub mod world;

pub use accounts::AccountStore;
pub use behavior::{Behavior, UnitError};
pub use report::Reporter;
pub use state::{BehaviorState, Mode};
pub use structure::{BuildOutcome, BuildReport, OffsetRole, TrapOffsets, TRAP_OFFSETS};
pub use unit::{
    mailbox, run_unit, CommandInbox, Preempt, UnitExit, UnitId, UnitMailbox, UnitSpec, FAULT_EXIT_CODE,
};
pub use world::{ActionError, ConnectOptions, Connection, Connector, GameWorld, Goal, WorldEvent};
