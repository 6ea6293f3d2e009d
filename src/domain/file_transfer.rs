//! Manifest-driven file transfer
//!
//! The peer drives the session through the request characteristic:
//!
//! ```text
//! SEND_FILES ──► READY ──► START ──► (name) ──► chunk … chunk ──► TRANSFER_COMPLETE
//!                            ▲                                          │
//!                            └──────── MORE_FILES ◄── MORE_FILES? ◄─────┘
//!                                                          │
//!                                                          └──► DONE (cursor back to 0)
//! ```
//!
//! Each tick performs at most one unit of protocol work: one name
//! announcement, one chunk notification, or one completion.

use crate::domain::models::StorageLayout;
use crate::error::{NodeError, Result};
use crate::infrastructure::bluetooth::protocol::{response, Channel, FileTxCommand, FILE_CHUNK_PAYLOAD};
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::storage::Storage;
use std::collections::HashSet;
use std::io::{self, Read};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Waiting for the peer's next command
    Idle,
    /// File opened, name not yet published
    Announcing,
    Transmitting,
    /// Last file finished; waiting for `MORE_FILES?`
    Completed,
}

/// Position within the manifest for the current epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCursor {
    pub index: usize,
    pub phase: TransferPhase,
    /// Bytes of the current file already sent
    pub offset: u64,
    pub started_at: Option<u64>,
}

impl Default for TransferCursor {
    fn default() -> Self {
        Self {
            index: 0,
            phase: TransferPhase::Idle,
            offset: 0,
            started_at: None,
        }
    }
}

/// Ordered, de-duplicated list of files pending transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    entries: Vec<String>,
}

impl FileManifest {
    /// Build from persisted manifest lines. Blank lines are skipped and only
    /// the first occurrence of a name is kept.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let entries = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty())
            .filter(|line| seen.insert(line.clone()))
            .collect();
        Self { entries }
    }

    /// Read the persisted manifest; a missing file is an empty manifest
    pub fn load(storage: &dyn Storage, path: &str) -> io::Result<Self> {
        match storage.read_lines(path) {
            Ok(lines) => Ok(Self::from_lines(lines)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct OpenFile {
    name: String,
    reader: Box<dyn Read>,
    chunks: u64,
}

pub struct FileTransferSession {
    layout: StorageLayout,
    notify_interval_ms: u64,
    manifest: Option<FileManifest>,
    cursor: TransferCursor,
    open_file: Option<OpenFile>,
    last_notify: Option<u64>,
    /// The last attempt on the file at the cursor failed; the peer may ask
    /// `MORE_FILES?` again before retrying
    retry_pending: bool,
}

impl FileTransferSession {
    pub fn new(layout: StorageLayout, notify_interval_ms: u64) -> Self {
        Self {
            layout,
            notify_interval_ms,
            manifest: None,
            cursor: TransferCursor::default(),
            open_file: None,
            last_notify: None,
            retry_pending: false,
        }
    }

    pub fn cursor(&self) -> &TransferCursor {
        &self.cursor
    }

    pub fn manifest(&self) -> Option<&FileManifest> {
        self.manifest.as_ref()
    }

    pub fn has_open_file(&self) -> bool {
        self.open_file.is_some()
    }

    /// A manifest is loaded and the peer has moved past its first file
    pub fn is_mid_epoch(&self) -> bool {
        self.manifest.is_some()
            && (self.cursor.index > 0 || self.cursor.phase != TransferPhase::Idle)
    }

    /// Handle one request written by the peer. Every outcome, including
    /// failures, is answered on the transport.
    pub fn handle(
        &mut self,
        command: FileTxCommand,
        storage: &mut dyn Storage,
        transport: &mut dyn Transport,
        now: u64,
    ) {
        debug!("File transfer request {:?} in {:?}", command, self.cursor.phase);
        match command {
            FileTxCommand::SendFiles => {
                let reply = match self.send_files(storage) {
                    Ok(()) => response::READY,
                    Err(NodeError::TransferInProgress { cursor }) => {
                        warn!("SEND_FILES rejected: transfer in progress at {}", cursor);
                        response::BUSY
                    }
                    Err(e) => {
                        warn!("SEND_FILES failed: {}", e);
                        response::ERROR
                    }
                };
                respond(transport, reply);
            }
            FileTxCommand::Start => self.start(storage, transport, now),
            FileTxCommand::MoreFiles => self.more_files(transport, false),
            FileTxCommand::Skip => self.more_files(transport, true),
            FileTxCommand::ClearFiles => {
                let reply = match self.clear_manifest(storage) {
                    Ok(()) => response::CLEARED,
                    Err(NodeError::TransferInProgress { .. }) => response::BUSY,
                    Err(e) => {
                        error!("Failed to clear manifest: {}", e);
                        response::ERROR
                    }
                };
                respond(transport, reply);
            }
        }
    }

    /// Load a fresh manifest and reset the cursor
    pub fn send_files(&mut self, storage: &dyn Storage) -> Result<()> {
        if self.is_mid_epoch() {
            return Err(NodeError::TransferInProgress {
                cursor: self.cursor.index,
            });
        }

        let manifest = FileManifest::load(storage, &self.layout.manifest_path)?;
        self.cursor = TransferCursor::default();
        self.retry_pending = false;
        if manifest.is_empty() {
            info!("No files available to transfer");
            self.manifest = None;
            return Err(NodeError::ManifestEmpty);
        }

        info!("Ready to send {} files: {:?}", manifest.len(), manifest.entries());
        self.manifest = Some(manifest);
        Ok(())
    }

    fn start(&mut self, storage: &mut dyn Storage, transport: &mut dyn Transport, now: u64) {
        match self.cursor.phase {
            TransferPhase::Announcing | TransferPhase::Transmitting => {
                respond(transport, response::BUSY);
                return;
            }
            TransferPhase::Idle | TransferPhase::Completed => {}
        }

        let Some(name) = self
            .manifest
            .as_ref()
            .and_then(|m| m.get(self.cursor.index))
            .map(str::to_string)
        else {
            warn!("START with no file pending at cursor {}", self.cursor.index);
            respond(transport, response::ERROR);
            return;
        };

        let path = self.layout.file_path(&name);
        let reader = if storage.exists(&path) {
            storage.open_read(&path)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, path.clone()))
        };

        match reader {
            Ok(reader) => {
                info!("Opened {} for transfer", path);
                self.open_file = Some(OpenFile {
                    name,
                    reader,
                    chunks: 0,
                });
                self.cursor.phase = TransferPhase::Announcing;
                self.cursor.offset = 0;
                self.cursor.started_at = Some(now);
                self.retry_pending = false;
            }
            Err(e) => {
                // Cursor stays put; the peer decides whether to retry or skip
                warn!("Cannot open {}: {}", path, e);
                self.retry_pending = true;
                publish(transport, Channel::FileTxName, response::ERROR.as_bytes());
            }
        }
    }

    fn more_files(&mut self, transport: &mut dyn Transport, skip: bool) {
        let Some(total) = self.manifest.as_ref().map(FileManifest::len) else {
            respond(transport, response::ERROR);
            return;
        };
        // MORE_FILES? follows a finished file or a failed attempt; SKIP is
        // also accepted while waiting for START
        let accepted = match self.cursor.phase {
            TransferPhase::Completed => true,
            TransferPhase::Idle => skip || self.retry_pending,
            TransferPhase::Announcing | TransferPhase::Transmitting => false,
        };
        if !accepted {
            let command = if skip { "SKIP" } else { "MORE_FILES?" };
            debug!("{} refused in {:?}", command, self.cursor.phase);
            respond(transport, response::BUSY);
            return;
        }
        self.retry_pending = false;

        if skip && self.cursor.index < total {
            info!(
                "Skipping {} at peer request",
                self.manifest
                    .as_ref()
                    .and_then(|m| m.get(self.cursor.index))
                    .unwrap_or_default()
            );
            self.cursor.index += 1;
        }

        if self.cursor.index < total {
            self.cursor.phase = TransferPhase::Idle;
            respond(transport, response::MORE_FILES);
        } else {
            info!("All {} files sent", total);
            self.cursor = TransferCursor::default();
            self.manifest = None;
            respond(transport, response::DONE);
        }
    }

    /// Truncate the persisted manifest. Refused while an epoch is in flight.
    pub fn clear_manifest(&mut self, storage: &mut dyn Storage) -> Result<()> {
        if self.is_mid_epoch() {
            return Err(NodeError::TransferInProgress {
                cursor: self.cursor.index,
            });
        }
        storage.truncate(&self.layout.manifest_path)?;
        self.manifest = None;
        info!("Transfer manifest cleared");
        Ok(())
    }

    /// Perform at most one unit of transfer work. Returns whether anything
    /// was published.
    pub fn tick(&mut self, transport: &mut dyn Transport, now: u64) -> bool {
        match self.cursor.phase {
            TransferPhase::Announcing => self.announce(transport, now),
            TransferPhase::Transmitting => self.send_chunk(transport, now),
            TransferPhase::Idle | TransferPhase::Completed => false,
        }
    }

    fn announce(&mut self, transport: &mut dyn Transport, now: u64) -> bool {
        let Some(file) = self.open_file.as_ref() else {
            self.cursor.phase = TransferPhase::Idle;
            return false;
        };
        if let Err(e) = transport.publish(Channel::FileTxName, file.name.as_bytes()) {
            error!("Cannot announce {}: {}", file.name, e);
            self.open_file = None;
            publish(transport, Channel::FileTxName, response::ERROR.as_bytes());
            self.cursor.phase = TransferPhase::Idle;
            self.cursor.offset = 0;
            self.retry_pending = true;
            return true;
        }
        info!("Announced {}, transmitting", file.name);
        self.cursor.phase = TransferPhase::Transmitting;
        self.last_notify = Some(now);
        true
    }

    fn spacing_elapsed(&self, now: u64) -> bool {
        self.last_notify
            .map_or(true, |last| now.saturating_sub(last) >= self.notify_interval_ms)
    }

    fn send_chunk(&mut self, transport: &mut dyn Transport, now: u64) -> bool {
        if !self.spacing_elapsed(now) {
            return false;
        }
        let Some(file) = self.open_file.as_mut() else {
            self.cursor.phase = TransferPhase::Idle;
            return false;
        };

        let mut buffer = [0u8; FILE_CHUNK_PAYLOAD];
        let read = match read_chunk(&mut file.reader, &mut buffer) {
            Ok(read) => read,
            Err(e) => {
                error!("Read failed on {} at byte {}: {}", file.name, self.cursor.offset, e);
                self.abort_file(transport);
                return true;
            }
        };

        if read == 0 {
            self.finish_file(transport, now);
            return true;
        }

        if let Err(e) = transport.publish(Channel::FileTxData, &buffer[..read]) {
            error!("Chunk publish failed on {}: {}", file.name, e);
            self.abort_file(transport);
            return true;
        }
        file.chunks += 1;
        self.cursor.offset += read as u64;
        self.last_notify = Some(now);
        true
    }

    fn finish_file(&mut self, transport: &mut dyn Transport, now: u64) {
        let Some(file) = self.open_file.take() else {
            return;
        };
        publish(
            transport,
            Channel::FileTxComplete,
            response::TRANSFER_COMPLETE.as_bytes(),
        );

        let elapsed_ms = self
            .cursor
            .started_at
            .map_or(0, |start| now.saturating_sub(start));
        let rate = if elapsed_ms > 0 {
            self.cursor.offset as f64 * 1000.0 / elapsed_ms as f64
        } else {
            0.0
        };
        info!(
            "File {} transmitted: {} bytes in {} chunks, {} ms ({:.0} B/s)",
            file.name, self.cursor.offset, file.chunks, elapsed_ms, rate
        );

        self.cursor.index += 1;
        self.cursor.phase = TransferPhase::Completed;
        self.last_notify = Some(now);
    }

    fn abort_file(&mut self, transport: &mut dyn Transport) {
        self.open_file = None;
        publish(transport, Channel::FileTxComplete, response::ERROR.as_bytes());
        self.cursor.phase = TransferPhase::Idle;
        self.cursor.offset = 0;
        self.retry_pending = true;
    }

    /// Release the open file and forget the epoch
    pub fn close(&mut self) {
        if let Some(file) = self.open_file.take() {
            info!(
                "Closing {} after {} bytes",
                file.name, self.cursor.offset
            );
        }
        self.manifest = None;
        self.cursor = TransferCursor::default();
        self.last_notify = None;
        self.retry_pending = false;
    }
}

/// Fill `buffer` from `reader`, stopping early only at end of file
fn read_chunk(reader: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn respond(transport: &mut dyn Transport, reply: &str) {
    publish(transport, Channel::FileTxRequest, reply.as_bytes());
}

fn publish(transport: &mut dyn Transport, channel: Channel, value: &[u8]) {
    if let Err(e) = transport.publish(channel, value) {
        warn!("Failed to publish on {:?}: {}", channel, e);
    }
}
