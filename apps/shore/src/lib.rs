pub mod config;
pub mod error;
pub mod media;
pub mod mock;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod telemetry;

pub use error::CallError;
pub use session::{CallSnapshot, CallState, ControllerConfig, ControllerHandle, SessionController};
