//! Mode controller
//!
//! Owns every adapter and the single active sub-session. All state mutation
//! happens inside [`Node::tick`], which either handles one queued transport
//! event or performs the periodic work of the active mode.

use crate::domain::config::{ConfigField, ConfigNegotiator};
use crate::domain::file_transfer::FileTransferSession;
use crate::domain::imu::ImuSensor;
use crate::domain::models::{Mode, PairingState, SessionKind, StorageLayout};
use crate::domain::settings::Settings;
use crate::domain::streaming::StreamingSession;
use crate::error::{NodeError, Result};
use crate::infrastructure::bluetooth::protocol::{
    decode_text, response, Channel, FileTxCommand, ImuCommand, Service,
};
use crate::infrastructure::bluetooth::transport::{Transport, TransportEvent};
use crate::infrastructure::storage::Storage;
use crate::infrastructure::ticks::TickSource;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Runtime parameters of the core, derived from [`Settings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub layout: StorageLayout,
    pub notify_interval_ms: u64,
    pub pairing_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for NodeConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            layout: StorageLayout::new(settings.data_dir.clone(), &settings.manifest_file),
            notify_interval_ms: settings.notify_interval_ms,
            pairing_timeout: Duration::from_secs(settings.pairing_timeout_secs),
        }
    }
}

enum ModeState {
    Idle,
    Pairing(PairingState),
    Config,
    Streaming(StreamingSession),
    FileTransfer(FileTransferSession),
}

impl ModeState {
    fn mode(&self) -> Mode {
        match self {
            Self::Idle => Mode::Idle,
            Self::Pairing(_) => Mode::Pairing,
            Self::Config => Mode::ConfigActive,
            Self::Streaming(_) => Mode::StreamingActive,
            Self::FileTransfer(_) => Mode::FileTransferActive,
        }
    }
}

pub struct Node {
    config: NodeConfig,
    state: ModeState,
    negotiator: ConfigNegotiator,
    last_pairing: Option<PairingState>,
    transport: Box<dyn Transport>,
    storage: Box<dyn Storage>,
    sensor: Box<dyn ImuSensor>,
    ticks: Box<dyn TickSource>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        transport: Box<dyn Transport>,
        storage: Box<dyn Storage>,
        sensor: Box<dyn ImuSensor>,
        ticks: Box<dyn TickSource>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            config,
            state: ModeState::Idle,
            negotiator: ConfigNegotiator::new(),
            last_pairing: None,
            transport,
            storage,
            sensor,
            ticks,
            events,
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &ConfigNegotiator {
        &self.negotiator
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Current pairing window, if pairing
    pub fn pairing(&self) -> Option<&PairingState> {
        match &self.state {
            ModeState::Pairing(pairing) => Some(pairing),
            _ => None,
        }
    }

    /// Outcome of the most recent finished pairing window
    pub fn last_pairing(&self) -> Option<&PairingState> {
        self.last_pairing.as_ref()
    }

    pub fn streaming(&self) -> Option<&StreamingSession> {
        match &self.state {
            ModeState::Streaming(session) => Some(session),
            _ => None,
        }
    }

    pub fn transfer(&self) -> Option<&FileTransferSession> {
        match &self.state {
            ModeState::FileTransfer(session) => Some(session),
            _ => None,
        }
    }

    pub fn enter_config(&mut self, timeout: Duration) -> Result<()> {
        self.enter(SessionKind::Config, timeout)
    }

    pub fn enter_streaming(&mut self, timeout: Duration) -> Result<()> {
        self.enter(SessionKind::Streaming, timeout)
    }

    pub fn enter_file_transfer(&mut self, timeout: Duration) -> Result<()> {
        self.enter(SessionKind::FileTransfer, timeout)
    }

    /// Open a pairing window for `kind`.
    ///
    /// Valid from Idle or Pairing (which retargets the window). Requesting
    /// the session that is already active is a no-op; any other active mode
    /// is rejected with [`NodeError::WrongMode`].
    pub fn enter(&mut self, kind: SessionKind, timeout: Duration) -> Result<()> {
        let current = self.mode();
        match current {
            Mode::Idle => {}
            Mode::Pairing => self.transport.stop_advertising(),
            active if active == kind.active_mode() => {
                debug!("{:?} already active", kind);
                return Ok(());
            }
            _ => {
                return Err(NodeError::WrongMode {
                    current,
                    requested: kind,
                })
            }
        }

        let now = self.ticks.now_ms();
        self.transport.advertise(kind.service());
        self.set_state(ModeState::Pairing(PairingState::new(kind, now, timeout)));
        info!("Pairing for {:?} session, timeout {:?}", kind, timeout);
        Ok(())
    }

    /// Leave the current mode. Any in-flight sub-session work is stopped and
    /// its storage handle released before the peer is disconnected.
    pub fn exit(&mut self) {
        let from = self.mode();
        let previous = std::mem::replace(&mut self.state, ModeState::Idle);
        match previous {
            ModeState::Idle => return,
            ModeState::Pairing(pairing) => {
                self.transport.stop_advertising();
                self.last_pairing = Some(pairing);
            }
            ModeState::Config => {}
            ModeState::Streaming(mut session) => {
                if let Err(e) = session.stop(&self.config.layout, self.storage.as_mut()) {
                    warn!("Recording not queued on exit: {}", e);
                }
            }
            ModeState::FileTransfer(mut session) => session.close(),
        }

        if self.transport.is_connected() {
            self.transport.disconnect();
        }
        info!("Mode {:?} -> {:?}", from, Mode::Idle);
    }

    /// Truncate the persisted transfer manifest.
    ///
    /// Refused while a file transfer epoch is in flight.
    pub fn clear_manifest(&mut self) -> Result<()> {
        match &mut self.state {
            ModeState::FileTransfer(session) => session.clear_manifest(self.storage.as_mut()),
            _ => {
                self.storage.truncate(&self.config.layout.manifest_path)?;
                info!("Transfer manifest cleared");
                Ok(())
            }
        }
    }

    /// Advance the node by one unit of work and return the resulting mode
    pub fn tick(&mut self) -> Mode {
        let now = self.ticks.now_ms();
        match self.events.try_recv() {
            Ok(event) => self.handle_event(event, now),
            Err(_) => self.run_active(now),
        }
        self.mode()
    }

    fn set_state(&mut self, state: ModeState) {
        let from = self.mode();
        self.state = state;
        info!("Mode {:?} -> {:?}", from, self.mode());
    }

    fn run_active(&mut self, now: u64) {
        match &mut self.state {
            ModeState::Idle | ModeState::Config => {}
            ModeState::Pairing(pairing) => {
                let pairing = *pairing;
                self.poll_pairing(pairing, now);
            }
            ModeState::Streaming(session) => {
                if let Err(e) = session.tick(self.sensor.as_mut(), self.transport.as_mut(), now) {
                    error!("Recording ended by storage failure: {}", e);
                    if let Err(e) = self
                        .transport
                        .publish(Channel::ImuRequest, response::ERROR.as_bytes())
                    {
                        warn!("Failed to report recording failure: {}", e);
                    }
                }
            }
            ModeState::FileTransfer(session) => {
                session.tick(self.transport.as_mut(), now);
            }
        }
    }

    fn poll_pairing(&mut self, pairing: PairingState, now: u64) {
        if pairing.is_expired(now) {
            self.expire_pairing(pairing, now);
        } else if self.transport.is_connected() {
            self.activate(pairing);
        }
    }

    /// Close a pairing window whose timeout has run out. A peer that got in
    /// after the deadline is dropped.
    fn expire_pairing(&mut self, mut pairing: PairingState, now: u64) {
        pairing.reached_timeout = true;
        warn!(
            "Pairing for {:?} timed out after {} ms",
            pairing.target,
            pairing.elapsed_ms(now)
        );
        self.transport.stop_advertising();
        if self.transport.is_connected() {
            self.transport.disconnect();
        }
        self.last_pairing = Some(pairing);
        self.set_state(ModeState::Idle);
    }

    fn activate(&mut self, pairing: PairingState) {
        self.transport.stop_advertising();
        self.last_pairing = Some(pairing);
        let state = match pairing.target {
            SessionKind::Config => ModeState::Config,
            SessionKind::Streaming => ModeState::Streaming(StreamingSession::new()),
            SessionKind::FileTransfer => ModeState::FileTransfer(FileTransferSession::new(
                self.config.layout.clone(),
                self.config.notify_interval_ms,
            )),
        };
        info!("Peer connected for {:?} session", pairing.target);
        self.set_state(state);
    }

    fn handle_event(&mut self, event: TransportEvent, now: u64) {
        match event {
            TransportEvent::Connected => match &self.state {
                ModeState::Pairing(pairing) => {
                    let pairing = *pairing;
                    if pairing.is_expired(now) {
                        self.expire_pairing(pairing, now);
                    } else {
                        self.activate(pairing);
                    }
                }
                _ => debug!("Connection event ignored in {:?}", self.mode()),
            },
            TransportEvent::Disconnected => match self.mode() {
                Mode::ConfigActive | Mode::StreamingActive | Mode::FileTransferActive => {
                    info!("Peer disconnected, leaving {:?}", self.mode());
                    self.exit();
                }
                mode => debug!("Disconnect event ignored in {:?}", mode),
            },
            TransportEvent::Written {
                characteristic,
                value,
            } => {
                let Some(channel) = self.transport.registry().resolve(&characteristic) else {
                    warn!("Write to unknown characteristic {} dropped", characteristic);
                    return;
                };
                if !channel.is_writable() {
                    warn!("Write to read-only {:?} dropped", channel);
                    return;
                }
                let text = decode_text(&value);
                debug!("{:?} written: {:?}", channel, text);
                match channel.service() {
                    Service::Config => self.handle_config_write(channel, &text, now),
                    Service::Imu => self.handle_imu_write(&text, now),
                    Service::FileTx => self.handle_file_tx_write(&text, now),
                }
            }
        }
    }

    fn handle_config_write(&mut self, channel: Channel, text: &str, now: u64) {
        if !matches!(self.state, ModeState::Config) {
            self.reject(channel, "not accepting config");
            return;
        }
        let Some(field) = ConfigField::from_channel(channel) else {
            return;
        };

        let file_name = match self.negotiator.accept(field, text, now) {
            Ok(file_name) => file_name,
            Err(e) => {
                warn!("Cannot derive file name: {}", e);
                response::CLOCK_ERROR.to_string()
            }
        };
        self.publish(Channel::ConfigFileName, file_name.as_bytes());
    }

    fn handle_imu_write(&mut self, text: &str, now: u64) {
        let ModeState::Streaming(session) = &mut self.state else {
            self.reject(Channel::ImuRequest, "not streaming");
            return;
        };
        let Some(command) = ImuCommand::parse(text) else {
            self.reject(Channel::ImuRequest, "unknown command");
            return;
        };

        let reply = match command {
            ImuCommand::Start if session.is_active() => response::BUSY.to_string(),
            ImuCommand::Start => match self.negotiator.canonical_file_name(now) {
                Err(e) => {
                    warn!("Cannot start recording: {}", e);
                    format!("{}: clock not set", response::ERROR)
                }
                Ok(file_name) => {
                    match session.start(file_name, &self.config.layout, self.storage.as_mut(), now)
                    {
                        Ok(()) => response::READY.to_string(),
                        Err(e) => {
                            error!("Cannot open recording sink: {}", e);
                            format!("{}: cannot open file", response::ERROR)
                        }
                    }
                }
            },
            ImuCommand::Stop => match session.stop(&self.config.layout, self.storage.as_mut()) {
                Ok(Some(_)) => response::DONE.to_string(),
                Ok(None) => format!("{}: not recording", response::ERROR),
                Err(_) => response::ERROR.to_string(),
            },
        };
        self.publish(Channel::ImuRequest, reply.as_bytes());
    }

    fn handle_file_tx_write(&mut self, text: &str, now: u64) {
        let ModeState::FileTransfer(session) = &mut self.state else {
            self.reject(Channel::FileTxRequest, "not transferring");
            return;
        };
        match FileTxCommand::parse(text) {
            Some(command) => {
                session.handle(command, self.storage.as_mut(), self.transport.as_mut(), now)
            }
            None => self.reject(Channel::FileTxRequest, "unknown command"),
        }
    }

    fn reject(&mut self, channel: Channel, reason: &str) {
        warn!("Rejected write to {:?} in {:?}: {}", channel, self.mode(), reason);
        let reply = format!("{}: {}", response::ERROR, reason);
        self.publish(channel, reply.as_bytes());
    }

    fn publish(&mut self, channel: Channel, value: &[u8]) {
        if let Err(e) = self.transport.publish(channel, value) {
            warn!("Failed to publish on {:?}: {}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::imu::SimulatedImu;
    use crate::infrastructure::bluetooth::protocol::GattProfile;
    use crate::infrastructure::bluetooth::{ChannelRegistry, LoopbackTransport, PeerHandle};
    use crate::infrastructure::storage::MemoryStorage;
    use crate::infrastructure::ticks::ManualTicks;

    fn node() -> (Node, PeerHandle, ManualTicks, MemoryStorage) {
        let registry = ChannelRegistry::from_profile(&GattProfile::default()).unwrap();
        let transport = LoopbackTransport::new(registry);
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = transport.peer(tx);
        let ticks = ManualTicks::new(0);
        let storage = MemoryStorage::new();
        let node = Node::new(
            NodeConfig::default(),
            Box::new(transport),
            Box::new(storage.clone()),
            Box::new(SimulatedImu::default()),
            Box::new(ticks.clone()),
            rx,
        );
        (node, peer, ticks, storage)
    }

    #[test]
    fn test_enter_advertises_target_service() {
        let (mut node, peer, _ticks, _storage) = node();
        node.enter_file_transfer(Duration::from_secs(5)).unwrap();
        assert_eq!(node.mode(), Mode::Pairing);
        assert_eq!(peer.advertised(), Some(Service::FileTx));

        // Retarget while still pairing
        node.enter_config(Duration::from_secs(5)).unwrap();
        assert_eq!(peer.advertised(), Some(Service::Config));
        assert_eq!(node.pairing().map(|p| p.target), Some(SessionKind::Config));
    }

    #[test]
    fn test_connect_activates_target() {
        let (mut node, peer, _ticks, _storage) = node();
        node.enter_streaming(Duration::from_secs(5)).unwrap();
        assert!(peer.connect());

        assert_eq!(node.tick(), Mode::StreamingActive);
        assert_eq!(peer.advertised(), None);
        assert!(!node.last_pairing().unwrap().reached_timeout);
    }

    #[test]
    fn test_pairing_timeout_returns_to_idle() {
        let (mut node, peer, ticks, _storage) = node();
        node.enter_config(Duration::from_secs(2)).unwrap();

        ticks.advance(1_999);
        assert_eq!(node.tick(), Mode::Pairing);
        ticks.advance(1);
        assert_eq!(node.tick(), Mode::Idle);

        assert!(node.last_pairing().unwrap().reached_timeout);
        assert_eq!(peer.advertised(), None);
        assert!(!peer.connect());
    }

    #[test]
    fn test_enter_rejected_from_other_active_mode() {
        let (mut node, peer, _ticks, _storage) = node();
        node.enter_config(Duration::from_secs(5)).unwrap();
        peer.connect();
        node.tick();

        let err = node.enter_streaming(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(
            err,
            NodeError::WrongMode {
                current: Mode::ConfigActive,
                requested: SessionKind::Streaming,
            }
        ));
        assert_eq!(node.mode(), Mode::ConfigActive);

        node.enter_config(Duration::from_secs(5)).unwrap();
        assert_eq!(node.mode(), Mode::ConfigActive);
    }

    #[test]
    fn test_exit_disconnects_peer() {
        let (mut node, peer, _ticks, _storage) = node();
        node.enter_config(Duration::from_secs(5)).unwrap();
        peer.connect();
        node.tick();

        node.exit();
        assert_eq!(node.mode(), Mode::Idle);
        assert!(!peer.is_connected());
    }

    #[test]
    fn test_one_event_per_tick() {
        let (mut node, peer, ticks, _storage) = node();
        node.enter_config(Duration::from_secs(5)).unwrap();
        peer.connect();
        node.tick();
        peer.take_publications();

        peer.write(Channel::DateTime, "2024_05_01_08_00_00");
        peer.write(Channel::PersonName, "alex");
        ticks.advance(10);
        node.tick();
        assert_eq!(peer.take_publications().len(), 1);
        node.tick();
        let published = peer.take_publications();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].text(), "2024_05_01_08_00_00-alex-.csv");
    }

    #[test]
    fn test_clear_manifest_outside_transfer() {
        let (mut node, _peer, _ticks, storage) = node();
        storage.put("accelDir/whiteList.txt", "a.csv\n");
        node.clear_manifest().unwrap();
        assert_eq!(storage.contents("accelDir/whiteList.txt"), Some(Vec::new()));
    }

    #[test]
    fn test_connect_after_deadline_is_refused() {
        let (mut node, peer, ticks, _storage) = node();
        node.enter_config(Duration::from_secs(2)).unwrap();
        assert!(peer.connect());

        ticks.advance(2_000);
        assert_eq!(node.tick(), Mode::Idle);
        assert!(node.last_pairing().unwrap().reached_timeout);
        assert!(!peer.is_connected());
        assert_eq!(peer.advertised(), None);
    }

    #[test]
    fn test_connected_link_after_deadline_is_dropped() {
        let (mut node, peer, ticks, _storage) = node();
        node.enter_streaming(Duration::from_secs(1)).unwrap();
        assert!(peer.connect());
        ticks.advance(500);
        // Drain the connect event so only the link state remains
        let _ = node.events.try_recv();

        ticks.advance(500);
        assert_eq!(node.tick(), Mode::Idle);
        assert!(!peer.is_connected());
    }
}
