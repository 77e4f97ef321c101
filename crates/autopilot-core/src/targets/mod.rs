//! Target connections and the payload that runs inside them.

mod manager;
pub mod payload;

pub use manager::{ConnectionManager, PushAck, Target, TargetInfo, TargetState};
pub use payload::Payload;
