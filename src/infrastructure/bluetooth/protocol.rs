//! SwIMU GATT Protocol
//!
//! This module contains the protocol definitions shared by the node and its
//! peer: service and characteristic UUIDs, payload caps, and the request /
//! response vocabulary written to the request characteristics.

use serde::{Deserialize, Serialize};

/// Configuration service: date/time, person and activity fields plus the
/// derived file name.
pub const CONFIG_SERVICE_UUID: &str = "550e8400-e29b-41d4-a716-446655440000";
pub const DATETIME_CHAR_UUID: &str = "550e8401-e29b-41d4-a716-446655440001";
pub const PERSON_NAME_CHAR_UUID: &str = "550e8401-e29b-41d4-a716-446655440002";
pub const ACTIVITY_TYPE_CHAR_UUID: &str = "550e8401-e29b-41d4-a716-446655440003";
pub const CONFIG_FILE_NAME_CHAR_UUID: &str = "550e8401-e29b-41d4-a716-446655440004";

/// Live IMU streaming service
pub const IMU_SERVICE_UUID: &str = "550e8402-e29b-41d4-a716-446655440000";
pub const IMU_REQUEST_CHAR_UUID: &str = "550e8403-e29b-41d4-a716-446655440001";
pub const IMU_DATA_CHAR_UUID: &str = "550e8403-e29b-41d4-a716-446655440002";

/// Recorded file transfer service
pub const FILE_TX_SERVICE_UUID: &str = "550e8404-e29b-41d4-a716-446655440000";
pub const FILE_TX_REQUEST_CHAR_UUID: &str = "550e8405-e29b-41d4-a716-446655440001";
pub const FILE_TX_DATA_CHAR_UUID: &str = "550e8405-e29b-41d4-a716-446655440002";
pub const FILE_TX_COMPLETE_CHAR_UUID: &str = "550e8405-e29b-41d4-a716-446655440003";
pub const FILE_TX_NAME_CHAR_UUID: &str = "550e8405-e29b-41d4-a716-446655440004";

/// Largest file data notification. Must match the negotiated ATT payload of
/// the transport; the peer reassembles files from chunks of this size.
pub const FILE_CHUNK_PAYLOAD: usize = 244;

/// Largest value in bytes the peer may write to a config field
pub const CONFIG_FIELD_LEN: usize = 25;

/// Default spacing between two notifications in milliseconds
pub const DEFAULT_NOTIFY_INTERVAL_MS: u64 = 30;

/// Responses written back to a request characteristic
pub mod response {
    pub const READY: &str = "READY";
    pub const ERROR: &str = "ERROR";
    pub const BUSY: &str = "BUSY";
    pub const MORE_FILES: &str = "MORE_FILES";
    pub const DONE: &str = "DONE";
    pub const CLEARED: &str = "CLEARED";
    /// Published on the complete characteristic after the last chunk of a file
    pub const TRANSFER_COMPLETE: &str = "TRANSFER_COMPLETE";
    /// Published as the derived file name when the clock cannot be read
    pub const CLOCK_ERROR: &str = "ERROR!";
}

/// GATT services exposed by the node. Exactly one is advertised per pairing
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Config,
    Imu,
    FileTx,
}

/// Named characteristics of the node profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    DateTime,
    PersonName,
    ActivityType,
    ConfigFileName,
    ImuRequest,
    ImuData,
    FileTxRequest,
    FileTxData,
    FileTxComplete,
    FileTxName,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::DateTime,
        Channel::PersonName,
        Channel::ActivityType,
        Channel::ConfigFileName,
        Channel::ImuRequest,
        Channel::ImuData,
        Channel::FileTxRequest,
        Channel::FileTxData,
        Channel::FileTxComplete,
        Channel::FileTxName,
    ];

    pub fn service(&self) -> Service {
        match self {
            Self::DateTime | Self::PersonName | Self::ActivityType | Self::ConfigFileName => {
                Service::Config
            }
            Self::ImuRequest | Self::ImuData => Service::Imu,
            Self::FileTxRequest | Self::FileTxData | Self::FileTxComplete | Self::FileTxName => {
                Service::FileTx
            }
        }
    }

    /// Whether the peer may write to this characteristic
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Self::DateTime
                | Self::PersonName
                | Self::ActivityType
                | Self::ImuRequest
                | Self::FileTxRequest
        )
    }

    /// Maximum value length the node may publish on this characteristic
    pub fn payload_cap(&self) -> usize {
        match self {
            Self::FileTxData => FILE_CHUNK_PAYLOAD,
            Self::ImuData => 100,
            Self::FileTxComplete => 30,
            Self::ConfigFileName | Self::FileTxName => 80,
            Self::DateTime
            | Self::PersonName
            | Self::ActivityType
            | Self::ImuRequest
            | Self::FileTxRequest => 64,
        }
    }

    /// Short name used by the console simulator
    pub fn name(&self) -> &'static str {
        match self {
            Self::DateTime => "dateTime",
            Self::PersonName => "personName",
            Self::ActivityType => "activityType",
            Self::ConfigFileName => "fileName",
            Self::ImuRequest => "imuRequest",
            Self::ImuData => "imuData",
            Self::FileTxRequest => "fileTxRequest",
            Self::FileTxData => "fileTxData",
            Self::FileTxComplete => "fileTxComplete",
            Self::FileTxName => "fileTxName",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// Commands accepted on the IMU request characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuCommand {
    Start,
    /// `STOP` and `END` are synonyms
    Stop,
}

impl ImuCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "START" => Some(Self::Start),
            "STOP" | "END" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Commands accepted on the file transfer request characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTxCommand {
    SendFiles,
    Start,
    MoreFiles,
    Skip,
    ClearFiles,
}

impl FileTxCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "SEND_FILES" => Some(Self::SendFiles),
            "START" => Some(Self::Start),
            "MORE_FILES?" => Some(Self::MoreFiles),
            "SKIP" => Some(Self::Skip),
            "CLEAR_FILES" => Some(Self::ClearFiles),
            _ => None,
        }
    }
}

/// Decode a characteristic write into text. Trailing NULs and surrounding
/// whitespace are dropped.
pub fn decode_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// UUID assignment for every service and characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    #[serde(default = "default_config_service")]
    pub config_service: String,
    #[serde(default = "default_datetime")]
    pub datetime: String,
    #[serde(default = "default_person_name")]
    pub person_name: String,
    #[serde(default = "default_activity_type")]
    pub activity_type: String,
    #[serde(default = "default_config_file_name")]
    pub config_file_name: String,
    #[serde(default = "default_imu_service")]
    pub imu_service: String,
    #[serde(default = "default_imu_request")]
    pub imu_request: String,
    #[serde(default = "default_imu_data")]
    pub imu_data: String,
    #[serde(default = "default_file_tx_service")]
    pub file_tx_service: String,
    #[serde(default = "default_file_tx_request")]
    pub file_tx_request: String,
    #[serde(default = "default_file_tx_data")]
    pub file_tx_data: String,
    #[serde(default = "default_file_tx_complete")]
    pub file_tx_complete: String,
    #[serde(default = "default_file_tx_name")]
    pub file_tx_name: String,
}

impl GattProfile {
    pub fn service_uuid(&self, service: Service) -> &str {
        match service {
            Service::Config => &self.config_service,
            Service::Imu => &self.imu_service,
            Service::FileTx => &self.file_tx_service,
        }
    }

    pub fn channel_uuid(&self, channel: Channel) -> &str {
        match channel {
            Channel::DateTime => &self.datetime,
            Channel::PersonName => &self.person_name,
            Channel::ActivityType => &self.activity_type,
            Channel::ConfigFileName => &self.config_file_name,
            Channel::ImuRequest => &self.imu_request,
            Channel::ImuData => &self.imu_data,
            Channel::FileTxRequest => &self.file_tx_request,
            Channel::FileTxData => &self.file_tx_data,
            Channel::FileTxComplete => &self.file_tx_complete,
            Channel::FileTxName => &self.file_tx_name,
        }
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            config_service: default_config_service(),
            datetime: default_datetime(),
            person_name: default_person_name(),
            activity_type: default_activity_type(),
            config_file_name: default_config_file_name(),
            imu_service: default_imu_service(),
            imu_request: default_imu_request(),
            imu_data: default_imu_data(),
            file_tx_service: default_file_tx_service(),
            file_tx_request: default_file_tx_request(),
            file_tx_data: default_file_tx_data(),
            file_tx_complete: default_file_tx_complete(),
            file_tx_name: default_file_tx_name(),
        }
    }
}

fn default_config_service() -> String {
    CONFIG_SERVICE_UUID.to_string()
}
fn default_datetime() -> String {
    DATETIME_CHAR_UUID.to_string()
}
fn default_person_name() -> String {
    PERSON_NAME_CHAR_UUID.to_string()
}
fn default_activity_type() -> String {
    ACTIVITY_TYPE_CHAR_UUID.to_string()
}
fn default_config_file_name() -> String {
    CONFIG_FILE_NAME_CHAR_UUID.to_string()
}
fn default_imu_service() -> String {
    IMU_SERVICE_UUID.to_string()
}
fn default_imu_request() -> String {
    IMU_REQUEST_CHAR_UUID.to_string()
}
fn default_imu_data() -> String {
    IMU_DATA_CHAR_UUID.to_string()
}
fn default_file_tx_service() -> String {
    FILE_TX_SERVICE_UUID.to_string()
}
fn default_file_tx_request() -> String {
    FILE_TX_REQUEST_CHAR_UUID.to_string()
}
fn default_file_tx_data() -> String {
    FILE_TX_DATA_CHAR_UUID.to_string()
}
fn default_file_tx_complete() -> String {
    FILE_TX_COMPLETE_CHAR_UUID.to_string()
}
fn default_file_tx_name() -> String {
    FILE_TX_NAME_CHAR_UUID.to_string()
}
