//! Reference Remote + Realtime collaborators: an HTTP/WebSocket pair for
//! talking to a real sync server, and an in-memory loopback pair for tests
//! that don't want a socket in the loop.

pub mod http;
pub mod loopback;
pub mod ws;

pub use http::HttpRemoteCollaborator;
pub use loopback::{LoopbackRealtime, LoopbackRemote};
pub use ws::WsRealtimeCollaborator;
