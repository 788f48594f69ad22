//! Padmap - gamepad-to-OSC mapping console
//!
//! Mirrors the mapping backend's configuration, shows live controller
//! activity per generic input and edits input mappings through a cascading
//! editor. Every change is an intent sent to the backend; the local mirror
//! only moves when the backend broadcasts its new configuration.

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod mapping;
pub mod paths;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{PadmapError, Result, StaleReference};
pub use session::{Session, SessionEvent};
