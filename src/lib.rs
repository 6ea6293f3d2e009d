//! SwIMU node core
//!
//! Mode and session logic of a wearable BLE motion-capture node: pairing
//! windows, configuration negotiation, live IMU streaming to storage and
//! manifest-driven file transfer over notifications. The radio, storage
//! medium, sensor and clock are reached through adapter traits so the core
//! runs the same against hardware, the filesystem or in-memory fakes.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{Mode, SessionKind};
pub use domain::node::{Node, NodeConfig};
pub use error::{NodeError, Result};
