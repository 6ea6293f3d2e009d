//! Bluetooth Module
//!
//! GATT-facing side of the node.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                         Node                             │
//! │   (drains TransportEvents, publishes responses/data)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ Transport trait
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ Registry  │  │  Loopback  │  │ Protocol │
//! │           │  │            │  │          │
//! │ - UUID ↔  │  │ - In-memory│  │ - UUIDs  │
//! │   channel │  │   adapter  │  │ - Commands│
//! │           │  │ - Peer end │  │ - Caps   │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Profile UUIDs, payload caps and the command vocabulary
//! - [`registry`] - Characteristic UUID to channel mapping
//! - [`transport`] - Adapter trait and inbound event type
//! - [`loopback`] - In-memory adapter with a simulated peer

pub mod loopback;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use loopback::{LoopbackTransport, PeerHandle, Publication};
pub use registry::ChannelRegistry;
pub use transport::{Transport, TransportEvent};
