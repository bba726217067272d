//! Real-time subsystem: the connection registry, the wire protocol, and
//! the WebSocket serving layer that feeds it.

mod protocol;
mod registry;
mod server;
mod session;

pub use protocol::{ClientMessage, Envelope};
pub use registry::{ConnectionRegistry, OutboundSender};
pub use server::WebSocketServer;
pub use session::Session;
