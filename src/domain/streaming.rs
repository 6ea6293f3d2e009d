//! Live streaming session
//!
//! While active, every tick reads one IMU sample, appends it to the recording
//! sink and publishes it on the IMU data characteristic.

use crate::domain::imu::ImuSensor;
use crate::domain::models::StorageLayout;
use crate::error::Result;
use crate::infrastructure::bluetooth::protocol::Channel;
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::storage::Storage;
use std::io::Write;
use tracing::{error, info, warn};

/// Outcome of a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub file_name: String,
    pub samples: u64,
    pub elapsed_secs: f64,
}

impl RecordingSummary {
    /// Effective sample rate in Hz
    pub fn rate_hz(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.samples as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

struct Recording {
    file_name: String,
    sink: Box<dyn Write>,
    started_at: u64,
    samples: u64,
    last_elapsed: f64,
}

#[derive(Default)]
pub struct StreamingSession {
    recording: Option<Recording>,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.recording.is_some()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.recording.as_ref().map(|r| r.file_name.as_str())
    }

    pub fn samples(&self) -> u64 {
        self.recording.as_ref().map_or(0, |r| r.samples)
    }

    /// Open a truncated sink for `file_name` and begin sampling
    pub fn start(
        &mut self,
        file_name: String,
        layout: &StorageLayout,
        storage: &mut dyn Storage,
        now: u64,
    ) -> Result<()> {
        let sink = storage.create(&layout.file_path(&file_name))?;
        info!("Data recording started: {}", file_name);
        self.recording = Some(Recording {
            file_name,
            sink,
            started_at: now,
            samples: 0,
            last_elapsed: 0.0,
        });
        Ok(())
    }

    /// Produce at most one sample. A failed write closes the sink and ends
    /// the recording; the error is returned after cleanup.
    pub fn tick(
        &mut self,
        sensor: &mut dyn ImuSensor,
        transport: &mut dyn Transport,
        now: u64,
    ) -> Result<bool> {
        let Some(recording) = self.recording.as_mut() else {
            return Ok(false);
        };

        let elapsed = now.saturating_sub(recording.started_at) as f64 / 1000.0;
        let record = sensor.read().to_record(elapsed);

        if let Err(e) = writeln!(recording.sink, "{}", record) {
            error!("Write to recording sink failed, ending session: {}", e);
            // Dropping the recording closes the sink
            self.recording = None;
            return Err(e.into());
        }
        recording.samples += 1;
        recording.last_elapsed = elapsed;

        if let Err(e) = transport.publish(Channel::ImuData, record.as_bytes()) {
            warn!("Failed to publish sample: {}", e);
        }
        Ok(true)
    }

    /// Close the sink and queue the file for transfer. Returns `Ok(None)`
    /// when inactive.
    ///
    /// A failed final flush means the recording on storage is incomplete, so
    /// it is not queued and the error is returned instead.
    pub fn stop(
        &mut self,
        layout: &StorageLayout,
        storage: &mut dyn Storage,
    ) -> Result<Option<RecordingSummary>> {
        let Some(Recording {
            file_name,
            mut sink,
            samples,
            last_elapsed,
            ..
        }) = self.recording.take()
        else {
            return Ok(None);
        };

        let flushed = sink.flush();
        drop(sink);
        if let Err(e) = flushed {
            error!("Failed to flush {}, recording dropped: {}", file_name, e);
            return Err(e.into());
        }

        if let Err(e) = storage.append_line(&layout.manifest_path, &file_name) {
            error!("Failed to add {} to transfer manifest: {}", file_name, e);
            return Err(e.into());
        }

        let summary = RecordingSummary {
            file_name,
            samples,
            elapsed_secs: last_elapsed,
        };
        info!(
            "Data recording stopped: {} ({} samples, {:.2} Hz)",
            summary.file_name,
            summary.samples,
            summary.rate_hz()
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::imu::{FixedImu, ImuReading};
    use crate::infrastructure::bluetooth::protocol::GattProfile;
    use crate::infrastructure::bluetooth::{ChannelRegistry, LoopbackTransport};
    use crate::infrastructure::storage::MemoryStorage;
    use tokio::sync::mpsc;

    fn transport() -> (LoopbackTransport, crate::infrastructure::bluetooth::PeerHandle) {
        let registry = ChannelRegistry::from_profile(&GattProfile::default()).unwrap();
        let transport = LoopbackTransport::new(registry);
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = transport.peer(tx);
        (transport, peer)
    }

    fn sensor() -> FixedImu {
        FixedImu(ImuReading {
            accel_z: 1.0,
            ..ImuReading::default()
        })
    }

    #[test]
    fn test_one_sample_per_tick_is_recorded_and_published() {
        let layout = StorageLayout::default();
        let mut storage = MemoryStorage::new();
        let (mut transport, peer) = transport();
        let mut imu = sensor();
        let mut session = StreamingSession::new();

        session
            .start("run.csv".into(), &layout, &mut storage, 1_000)
            .unwrap();
        assert!(session.tick(&mut imu, &mut transport, 1_000).unwrap());
        assert!(session.tick(&mut imu, &mut transport, 1_500).unwrap());

        let contents = String::from_utf8(storage.contents("accelDir/run.csv").unwrap()).unwrap();
        assert_eq!(
            contents,
            "0.0000,0.000,0.000,1.000,0.000,0.000,0.000\n\
             0.5000,0.000,0.000,1.000,0.000,0.000,0.000\n"
        );

        let published = peer.take_publications();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|p| p.channel == Channel::ImuData));
        assert_eq!(published[1].text(), "0.5000,0.000,0.000,1.000,0.000,0.000,0.000");
    }

    #[test]
    fn test_stop_appends_manifest_and_reports_rate() {
        let layout = StorageLayout::default();
        let mut storage = MemoryStorage::new();
        let (mut transport, _peer) = transport();
        let mut imu = sensor();
        let mut session = StreamingSession::new();

        session.start("run.csv".into(), &layout, &mut storage, 0).unwrap();
        for t in [0, 1_000, 2_000] {
            session.tick(&mut imu, &mut transport, t).unwrap();
        }
        let summary = session.stop(&layout, &mut storage).unwrap().unwrap();

        assert_eq!(summary.samples, 3);
        assert_eq!(summary.rate_hz(), 1.5);
        assert!(!session.is_active());
        assert_eq!(
            storage.read_lines(&layout.manifest_path).unwrap(),
            vec!["run.csv".to_string()]
        );
    }

    #[test]
    fn test_stop_when_inactive_touches_nothing() {
        let layout = StorageLayout::default();
        let mut storage = MemoryStorage::new();
        let mut session = StreamingSession::new();

        assert!(session.stop(&layout, &mut storage).unwrap().is_none());
        assert!(storage.paths().is_empty());
    }

    #[test]
    fn test_inactive_tick_is_a_no_op() {
        let (mut transport, peer) = transport();
        let mut imu = sensor();
        let mut session = StreamingSession::new();

        assert!(!session.tick(&mut imu, &mut transport, 0).unwrap());
        assert!(peer.take_publications().is_empty());
    }

    #[test]
    fn test_write_failure_ends_session() {
        let layout = StorageLayout::default();
        let mut storage = MemoryStorage::new();
        let (mut transport, peer) = transport();
        let mut imu = sensor();
        let mut session = StreamingSession::new();

        session.start("run.csv".into(), &layout, &mut storage, 0).unwrap();
        storage.set_fail_writes(true);

        assert!(session.tick(&mut imu, &mut transport, 10).is_err());
        assert!(!session.is_active());
        assert!(peer.take_publications().is_empty());
        assert!(!storage.exists(&layout.manifest_path));
    }

    #[test]
    fn test_flush_failure_at_stop_is_not_queued() {
        let layout = StorageLayout::default();
        let mut storage = MemoryStorage::new();
        let (mut transport, _peer) = transport();
        let mut imu = sensor();
        let mut session = StreamingSession::new();

        session.start("run.csv".into(), &layout, &mut storage, 0).unwrap();
        session.tick(&mut imu, &mut transport, 10).unwrap();
        storage.set_fail_writes(true);

        assert!(session.stop(&layout, &mut storage).is_err());
        assert!(!session.is_active());
        assert!(!storage.exists(&layout.manifest_path));
    }
}
