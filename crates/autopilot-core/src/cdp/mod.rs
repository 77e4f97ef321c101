//! Control-protocol client: wire frames, call correlation and the websocket
//! connection to a single target.

mod connection;
mod correlator;
pub mod protocol;

pub use connection::Connection;
pub use correlator::{Correlator, PendingGuard, PendingHandle};
pub use protocol::{evaluate_outcome, evaluate_params, Frame, RemoteErrorBody, Request};
