//! Transport Adapter Interface
//!
//! The node never talks to a GATT stack directly. Adapters expose advertising,
//! connection state and value publishing here, and deliver peer activity as
//! [`TransportEvent`]s over the node's inbound channel.

use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{Channel, Service};
use crate::infrastructure::bluetooth::registry::ChannelRegistry;
use uuid::Uuid;

/// Peer activity reported by the transport's callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// The peer wrote `value` to the characteristic with this UUID
    Written { characteristic: Uuid, value: Vec<u8> },
}

pub trait Transport {
    /// Characteristic UUID ↔ channel mapping registered at construction
    fn registry(&self) -> &ChannelRegistry;

    /// Start advertising `service`, replacing any current advertisement
    fn advertise(&mut self, service: Service);

    fn stop_advertising(&mut self);

    fn is_connected(&self) -> bool;

    /// Drop the current peer connection, if any
    fn disconnect(&mut self);

    /// Set the characteristic value and notify subscribers
    fn publish(&mut self, channel: Channel, value: &[u8]) -> Result<(), TransportError>;
}

/// Reject values longer than the channel's cap
pub fn check_payload(channel: Channel, value: &[u8]) -> Result<(), TransportError> {
    let cap = channel.payload_cap();
    if value.len() > cap {
        return Err(TransportError::PayloadTooLarge {
            channel,
            len: value.len(),
            cap,
        });
    }
    Ok(())
}
