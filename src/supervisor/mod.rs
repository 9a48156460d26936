//! Fleet supervisor: spawns execution units, relays their events to the
//! control surface, reconciles identities, and restarts crashed units.

pub mod fleet;
pub mod identity;
pub mod lifecycle;
pub mod log;
pub mod types;

pub use fleet::{Fleet, SupervisorHandle};
pub use identity::{Entry, IdentityError, IdentityMap};
pub use types::{ExitReport, FleetRequest, UnitLookup};
