//! Autopilot Core - Headless supervisor for IDE automation payloads.
//!
//! This crate discovers IDE windows exposing a remote-debugging port, keeps a
//! control connection to each of their pages, injects an automation payload
//! once per page and re-pushes the session configuration on a timer. Several
//! supervisor processes can run side by side; a heartbeat lock in a shared
//! SQLite store decides which one is in control.
//!
//! # Example
//!
//! ```rust,ignore
//! use autopilot_core::{IdeKind, Payload, SessionConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> autopilot_core::Result<()> {
//!     let payload = Payload::from_file("payload.js".as_ref())?;
//!     let supervisor = Supervisor::builder(IdeKind::Cursor, payload).build()?;
//!
//!     if !supervisor.is_available().await {
//!         println!("No IDE window with a debugging port found");
//!         return Ok(());
//!     }
//!
//!     let report = supervisor.start(SessionConfig::for_ide(IdeKind::Cursor)).await;
//!     println!("Leader: {}, configured: {:?}", report.leader, report.configured);
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod cdp;
pub mod config;
pub mod discovery;
pub mod election;
pub mod error;
pub mod platform;
pub mod session;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod targets;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::IdeKind;
pub use discovery::{DiscoveredPort, PageDescriptor, TargetDiscovery};
pub use election::{InstanceLock, LeaderDecision, LockRecord};
pub use error::{AutopilotError, Result};
pub use session::{SessionConfig, SessionCoordinator, TickReport};
pub use stats::{Alert, CollectionPass, NotificationEnvelope, StatsSnapshot, WeeklyStats};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreKeys};
pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorStatus};
pub use targets::{ConnectionManager, Payload, PushAck, TargetInfo, TargetState};
