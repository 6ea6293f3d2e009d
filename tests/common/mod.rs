//! Shared harness: a node wired to the loopback radio, in-memory storage and
//! a manual tick source.

#![allow(dead_code)]

use std::time::Duration;
use swimu_node::domain::imu::{FixedImu, ImuReading};
use swimu_node::domain::models::StorageLayout;
use swimu_node::infrastructure::bluetooth::protocol::{Channel, GattProfile};
use swimu_node::infrastructure::bluetooth::{ChannelRegistry, LoopbackTransport, PeerHandle, Publication};
use swimu_node::infrastructure::storage::MemoryStorage;
use swimu_node::infrastructure::ticks::ManualTicks;
use swimu_node::{Mode, Node, NodeConfig, SessionKind};
use tokio::sync::mpsc;

pub const TICK_MS: u64 = 10;

pub struct Harness {
    pub node: Node,
    pub peer: PeerHandle,
    pub ticks: ManualTicks,
    pub storage: MemoryStorage,
    pub layout: StorageLayout,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notify_interval(0)
    }

    pub fn with_notify_interval(notify_interval_ms: u64) -> Self {
        let registry = ChannelRegistry::from_profile(&GattProfile::default()).unwrap();
        let transport = LoopbackTransport::new(registry);
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = transport.peer(tx);
        let ticks = ManualTicks::new(1_000);
        let storage = MemoryStorage::new();
        let config = NodeConfig {
            notify_interval_ms,
            ..NodeConfig::default()
        };
        let layout = config.layout.clone();

        let reading = ImuReading {
            accel_x: 0.01,
            accel_y: -0.02,
            accel_z: 1.0,
            gyro_x: 0.5,
            gyro_y: 0.25,
            gyro_z: -0.125,
        };
        let node = Node::new(
            config,
            Box::new(transport),
            Box::new(storage.clone()),
            Box::new(FixedImu(reading)),
            Box::new(ticks.clone()),
            rx,
        );

        Self {
            node,
            peer,
            ticks,
            storage,
            layout,
        }
    }

    /// Store recordings and list them in the manifest, in order
    pub fn seed_files(&self, files: &[(&str, usize)]) {
        let mut manifest = String::new();
        for (name, size) in files {
            let contents: Vec<u8> = (0..*size).map(|i| (i % 251) as u8).collect();
            self.storage.put(&self.layout.file_path(name), contents);
            manifest.push_str(name);
            manifest.push('\n');
        }
        self.storage.put(&self.layout.manifest_path, manifest);
    }

    pub fn tick(&mut self) -> Mode {
        self.ticks.advance(TICK_MS);
        self.node.tick()
    }

    /// Run the pairing window for `kind` until the peer is attached
    pub fn pair(&mut self, kind: SessionKind) {
        self.node.enter(kind, Duration::from_secs(30)).unwrap();
        assert!(self.peer.connect());
        assert_eq!(self.tick(), kind.active_mode());
        self.peer.take_publications();
    }

    /// Peer write followed by the tick that drains it
    pub fn write(&mut self, channel: Channel, value: &str) -> Vec<Publication> {
        self.peer.write(channel, value);
        self.tick();
        self.peer.take_publications()
    }

    /// Tick until `done` holds for a publication, returning everything
    /// published on the way
    pub fn tick_until(&mut self, mut done: impl FnMut(&Publication) -> bool) -> Vec<Publication> {
        let mut seen = Vec::new();
        for _ in 0..100_000 {
            self.tick();
            let batch = self.peer.take_publications();
            let finished = batch.iter().any(&mut done);
            seen.extend(batch);
            if finished {
                return seen;
            }
        }
        panic!("condition never reached; published {:?}", seen.len());
    }

    pub fn manifest_lines(&self) -> Vec<String> {
        self.storage
            .contents(&self.layout.manifest_path)
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn texts(publications: &[Publication], channel: Channel) -> Vec<String> {
    publications
        .iter()
        .filter(|p| p.channel == channel)
        .map(Publication::text)
        .collect()
}
