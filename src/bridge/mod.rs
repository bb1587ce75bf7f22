pub mod agent;
pub mod protocol;
pub mod server;

pub use agent::BridgeAgentConfig;
pub use server::{is_bridge, BridgeConnection, BridgeManager};
