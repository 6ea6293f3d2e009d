//! Node core
//!
//! - [`node`] - Mode controller and the cooperative `tick()` entry point
//! - [`config`] / [`clock`] - Peer-supplied configuration and the virtual wall clock
//! - [`streaming`] - Live IMU recording
//! - [`file_transfer`] - Chunked upload of recorded files
//! - [`settings`] - Persisted node settings

pub mod clock;
pub mod config;
pub mod file_transfer;
pub mod imu;
pub mod models;
pub mod node;
pub mod settings;
pub mod streaming;
