// CDP client library for inspecting running browser-based applications
//
// Implements the part of the Chrome DevTools Protocol that probing a live
// process actually needs:
// - Target discovery over the debugging port
// - One WebSocket per target, with replies matched to commands by id
// - Per-command timeouts
// - Expression evaluation and a few Input helpers

pub mod connection;
pub mod discovery;
pub mod eventloop;
pub mod input;
pub mod protocol;
pub mod runtime;

pub use connection::{CdpConnection, ClientConfig};
pub use discovery::{DebugEndpoint, TargetInfo, TargetSelector};
pub use protocol::{CdpError, CdpResult, Event, Reply};
pub use runtime::Evaluation;
