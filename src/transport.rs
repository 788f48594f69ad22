//! Link to the mapping backend
//!
//! Outbound intents and inbound broadcasts as Socket.IO events over a single
//! WebSocket, plus the HTTP fetch of the input definitions table.

pub mod handle;
pub mod http;
pub mod messages;
pub mod socketio;
pub mod ws;

pub use handle::TransportHandle;
pub use http::fetch_input_definitions;
pub use messages::{
    Broadcast, FrameError, Intent, LiveValue, NamedValue, OperationStatus, StatusScope,
};
pub use ws::{spawn_client, ClientOptions};
