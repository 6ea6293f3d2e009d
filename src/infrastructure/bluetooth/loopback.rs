//! Loopback Transport
//!
//! In-memory transport adapter. The node side implements [`Transport`]; a
//! [`PeerHandle`] plays the central: it connects, writes characteristics and
//! collects every value the node publishes.

use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{Channel, Service};
use crate::infrastructure::bluetooth::registry::ChannelRegistry;
use crate::infrastructure::bluetooth::transport::{check_payload, Transport, TransportEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One value published by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub channel: Channel,
    pub value: Vec<u8>,
}

impl Publication {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    advertising: Option<Service>,
    values: HashMap<Channel, Vec<u8>>,
    pending: Vec<Publication>,
}

type SharedLink = Arc<Mutex<LinkState>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, LinkState> {
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Node side of the loopback link
pub struct LoopbackTransport {
    registry: ChannelRegistry,
    link: SharedLink,
}

impl LoopbackTransport {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self {
            registry,
            link: Arc::new(Mutex::new(LinkState::default())),
        }
    }

    /// Create the peer end. Peer activity is delivered through `event_sender`.
    pub fn peer(&self, event_sender: mpsc::UnboundedSender<TransportEvent>) -> PeerHandle {
        PeerHandle {
            registry: self.registry.clone(),
            link: Arc::clone(&self.link),
            event_sender,
        }
    }
}

impl Transport for LoopbackTransport {
    fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    fn advertise(&mut self, service: Service) {
        info!("Advertising {:?} service", service);
        lock(&self.link).advertising = Some(service);
    }

    fn stop_advertising(&mut self) {
        let mut link = lock(&self.link);
        if let Some(service) = link.advertising.take() {
            debug!("Stopped advertising {:?} service", service);
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.link).connected
    }

    fn disconnect(&mut self) {
        let mut link = lock(&self.link);
        if !link.connected {
            return;
        }
        link.connected = false;
        info!("Disconnected from central");
    }

    fn publish(&mut self, channel: Channel, value: &[u8]) -> Result<(), TransportError> {
        check_payload(channel, value)?;

        let mut link = lock(&self.link);
        link.values.insert(channel, value.to_vec());
        link.pending.push(Publication {
            channel,
            value: value.to_vec(),
        });
        Ok(())
    }
}

/// Central side of the loopback link
#[derive(Clone)]
pub struct PeerHandle {
    registry: ChannelRegistry,
    link: SharedLink,
    event_sender: mpsc::UnboundedSender<TransportEvent>,
}

impl PeerHandle {
    /// Connect to the node. Only succeeds while a service is advertised.
    pub fn connect(&self) -> bool {
        {
            let mut link = lock(&self.link);
            if link.advertising.is_none() {
                debug!("Connect attempt while node is not advertising");
                return false;
            }
            link.connected = true;
        }
        self.send(TransportEvent::Connected);
        true
    }

    pub fn disconnect(&self) {
        let was_connected = {
            let mut link = lock(&self.link);
            std::mem::replace(&mut link.connected, false)
        };
        if was_connected {
            self.send(TransportEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link).connected
    }

    pub fn advertised(&self) -> Option<Service> {
        lock(&self.link).advertising
    }

    /// Write a characteristic by channel
    pub fn write(&self, channel: Channel, value: impl AsRef<[u8]>) {
        match self.registry.uuid_of(channel) {
            Some(characteristic) => self.write_uuid(characteristic, value),
            None => warn!("No UUID registered for {:?}", channel),
        }
    }

    /// Write a characteristic by raw UUID
    pub fn write_uuid(&self, characteristic: Uuid, value: impl AsRef<[u8]>) {
        self.send(TransportEvent::Written {
            characteristic,
            value: value.as_ref().to_vec(),
        });
    }

    /// Current value of a characteristic, as a read would return it
    pub fn read(&self, channel: Channel) -> Option<Vec<u8>> {
        lock(&self.link).values.get(&channel).cloned()
    }

    /// Drain every publication since the last call, in publish order
    pub fn take_publications(&self) -> Vec<Publication> {
        std::mem::take(&mut lock(&self.link).pending)
    }

    fn send(&self, event: TransportEvent) {
        if self.event_sender.send(event).is_err() {
            warn!("Node event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::{GattProfile, FILE_CHUNK_PAYLOAD};

    fn link() -> (
        LoopbackTransport,
        PeerHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let registry = ChannelRegistry::from_profile(&GattProfile::default()).unwrap();
        let transport = LoopbackTransport::new(registry);
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = transport.peer(tx);
        (transport, peer, rx)
    }

    #[test]
    fn test_connect_requires_advertising() {
        let (mut transport, peer, mut rx) = link();
        assert!(!peer.connect());
        assert!(rx.try_recv().is_err());

        transport.advertise(Service::FileTx);
        assert!(peer.connect());
        assert!(transport.is_connected());
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connected);
    }

    #[test]
    fn test_publish_enforces_cap() {
        let (mut transport, peer, _rx) = link();
        let chunk = vec![7u8; FILE_CHUNK_PAYLOAD];
        transport.publish(Channel::FileTxData, &chunk).unwrap();

        let too_big = vec![7u8; FILE_CHUNK_PAYLOAD + 1];
        let err = transport.publish(Channel::FileTxData, &too_big).unwrap_err();
        assert_eq!(
            err,
            TransportError::PayloadTooLarge {
                channel: Channel::FileTxData,
                len: FILE_CHUNK_PAYLOAD + 1,
                cap: FILE_CHUNK_PAYLOAD,
            }
        );

        let published = peer.take_publications();
        assert_eq!(published.len(), 1);
        assert_eq!(peer.read(Channel::FileTxData), Some(chunk));
    }

    #[test]
    fn test_peer_write_resolves_uuid() {
        let (transport, peer, mut rx) = link();
        peer.write(Channel::FileTxRequest, "SEND_FILES");

        match rx.try_recv().unwrap() {
            TransportEvent::Written {
                characteristic,
                value,
            } => {
                assert_eq!(
                    transport.registry().resolve(&characteristic),
                    Some(Channel::FileTxRequest)
                );
                assert_eq!(value, b"SEND_FILES");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_device_disconnect_is_silent() {
        let (mut transport, peer, mut rx) = link();
        transport.advertise(Service::Config);
        peer.connect();
        let _ = rx.try_recv();

        transport.disconnect();
        assert!(!peer.is_connected());
        assert!(rx.try_recv().is_err());
    }
}
