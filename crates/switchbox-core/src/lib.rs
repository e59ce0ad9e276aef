//! Switchbox core — shared types, config, sessions, and the message bus.
//!
//! Everything the gateway's channels, agent loop, and providers depend on
//! without depending on each other.

pub mod bus;
pub mod config;
pub mod devices;
pub mod heartbeat;
pub mod routing;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::Config;
pub use devices::DeviceService;
pub use heartbeat::HeartbeatService;
pub use session::SessionManager;
