//! Botfleet - supervisor for a fleet of scripted game agents

pub mod supervisor;

pub use supervisor::{Fleet, SupervisorHandle};
