//! Session configuration and the coordinator that applies it.

mod config;
mod coordinator;

pub use config::{SessionConfig, WireConfig, DEFAULT_BANNED_COMMANDS};
pub use coordinator::{FailureStage, SessionCoordinator, TargetFailure, TickReport};
