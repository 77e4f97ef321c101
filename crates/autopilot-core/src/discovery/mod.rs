//! Target discovery.
//!
//! Each IDE window started with a remote-debugging port serves a JSON list of
//! its pages at `http://127.0.0.1:<port>/json/list`. Discovery probes a small
//! port range concurrently and returns the pages that can be controlled.

mod scanner;
mod types;

pub use scanner::{filter_controllable, TargetDiscovery};
pub use types::{DiscoveredPort, PageDescriptor};
