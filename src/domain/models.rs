use crate::infrastructure::bluetooth::protocol::Service;
use crate::infrastructure::storage;
use std::time::Duration;

/// Top-level node mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Pairing,
    ConfigActive,
    StreamingActive,
    FileTransferActive,
}

/// A session the node can pair into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Config,
    Streaming,
    FileTransfer,
}

impl SessionKind {
    /// Service advertised while pairing for this session
    pub fn service(&self) -> Service {
        match self {
            Self::Config => Service::Config,
            Self::Streaming => Service::Imu,
            Self::FileTransfer => Service::FileTx,
        }
    }

    /// Mode the node enters once a peer connects
    pub fn active_mode(&self) -> Mode {
        match self {
            Self::Config => Mode::ConfigActive,
            Self::Streaming => Mode::StreamingActive,
            Self::FileTransfer => Mode::FileTransferActive,
        }
    }
}

/// One pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingState {
    pub target: SessionKind,
    pub started_at: u64,
    pub timeout: Duration,
    pub reached_timeout: bool,
}

impl PairingState {
    pub fn new(target: SessionKind, started_at: u64, timeout: Duration) -> Self {
        Self {
            target,
            started_at,
            timeout,
            reached_timeout: false,
        }
    }

    pub fn elapsed_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        u128::from(self.elapsed_ms(now)) >= self.timeout.as_millis()
    }
}

/// Where recordings and the pending-transfer manifest live in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub data_dir: String,
    pub manifest_path: String,
}

impl StorageLayout {
    pub fn new(data_dir: impl Into<String>, manifest_file: &str) -> Self {
        let data_dir = data_dir.into();
        let manifest_path = storage::join(&data_dir, manifest_file);
        Self {
            data_dir,
            manifest_path,
        }
    }

    /// Storage path of a recording listed in the manifest
    pub fn file_path(&self, file_name: &str) -> String {
        storage::join(&self.data_dir, file_name)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("accelDir", "whiteList.txt")
    }
}
