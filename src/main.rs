//! SwIMU node simulator
//!
//! Runs the node core against the host filesystem and a loopback radio.
//! Lines on stdin stand in for the button and for the peer:
//!
//! ```text
//! config|stream|files [timeout_s]   press the button for a session
//! exit                              leave the current mode
//! connect | disconnect              peer link
//! write <channel> <value>           peer characteristic write
//! clear                             truncate the transfer manifest
//! status                            print node state
//! quit
//! ```

use anyhow::{bail, Context};
use std::time::Duration;
use swimu_node::domain::imu::SimulatedImu;
use swimu_node::domain::settings::{Settings, SettingsService};
use swimu_node::infrastructure::bluetooth::protocol::Channel;
use swimu_node::infrastructure::bluetooth::{
    ChannelRegistry, LoopbackTransport, PeerHandle, Publication,
};
use swimu_node::infrastructure::logging::init_logging;
use swimu_node::infrastructure::storage::{FsStorage, Storage};
use swimu_node::infrastructure::ticks::MonotonicTicks;
use swimu_node::{Node, NodeConfig, SessionKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Enter {
        kind: SessionKind,
        timeout: Option<Duration>,
    },
    Exit,
    Connect,
    Disconnect,
    Write {
        channel: Channel,
        value: String,
    },
    ClearFiles,
    Status,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim).unwrap_or_default();

        let command = match verb {
            "config" | "stream" | "files" => {
                let kind = match verb {
                    "config" => SessionKind::Config,
                    "stream" => SessionKind::Streaming,
                    _ => SessionKind::FileTransfer,
                };
                let timeout = if rest.is_empty() {
                    None
                } else {
                    let secs: u64 = rest
                        .parse()
                        .with_context(|| format!("invalid timeout {:?}", rest))?;
                    Some(Duration::from_secs(secs))
                };
                Self::Enter { kind, timeout }
            }
            "exit" => Self::Exit,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "write" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let name = args.next().unwrap_or_default();
                let Some(channel) = Channel::from_name(name) else {
                    bail!("unknown channel {:?}", name);
                };
                if !channel.is_writable() {
                    bail!("{} is read-only", channel.name());
                }
                let value = args.next().map(str::trim).unwrap_or_default().to_string();
                Self::Write { channel, value }
            }
            "clear" => Self::ClearFiles,
            "status" => Self::Status,
            "quit" => Self::Quit,
            other => bail!("unknown command {:?}", other),
        };
        Ok(command)
    }
}

/// Apply one console command. Returns false once the simulator should stop.
fn execute(node: &mut Node, peer: &PeerHandle, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Enter { kind, timeout } => {
            let timeout = timeout.unwrap_or(node.config().pairing_timeout);
            if let Err(e) = node.enter(kind, timeout) {
                warn!("{}", e);
            }
        }
        ConsoleCommand::Exit => node.exit(),
        ConsoleCommand::Connect => {
            if !peer.connect() {
                warn!("Node is not advertising");
            }
        }
        ConsoleCommand::Disconnect => peer.disconnect(),
        ConsoleCommand::Write { channel, value } => peer.write(channel, value),
        ConsoleCommand::ClearFiles => match node.clear_manifest() {
            Ok(()) => info!("Manifest cleared"),
            Err(e) => warn!("{}", e),
        },
        ConsoleCommand::Status => print_status(node, peer),
        ConsoleCommand::Quit => return false,
    }
    true
}

fn print_status(node: &Node, peer: &PeerHandle) {
    info!(
        "Mode {:?}, peer {}, advertising {:?}",
        node.mode(),
        if peer.is_connected() { "connected" } else { "disconnected" },
        peer.advertised()
    );
    if let Some(pairing) = node.pairing() {
        info!("Pairing for {:?}, timeout {:?}", pairing.target, pairing.timeout);
    }
    if let Some(session) = node.streaming() {
        info!(
            "Recording {:?}, {} samples",
            session.file_name(),
            session.samples()
        );
    }
    if let Some(session) = node.transfer() {
        info!(
            "Transfer cursor {:?}, manifest {:?}",
            session.cursor(),
            session.manifest().map(|m| m.entries())
        );
    }
    let profile = node.negotiator().profile();
    info!(
        "Config: clock {:?}, person {:?}, activity {:?}",
        profile.clock.captured(),
        profile.person_name,
        profile.activity_type
    );
}

fn log_publication(publication: &Publication) {
    match publication.channel {
        Channel::FileTxData | Channel::ImuData => debug!(
            "<- {} ({} bytes)",
            publication.channel.name(),
            publication.value.len()
        ),
        channel => info!("<- {}: {}", channel.name(), publication.text()),
    }
}

fn dump_storage(storage: &dyn Storage, settings: &Settings) {
    match storage.list(&settings.data_dir, settings.listing_depth) {
        Ok(entries) => {
            info!("{} entries under {}", entries.len(), settings.data_dir);
            for entry in entries {
                let indent = "  ".repeat(entry.depth + 1);
                if entry.is_dir {
                    info!("{}{}/", indent, entry.path);
                } else {
                    info!("{}{} ({} bytes)", indent, entry.path, entry.size);
                }
            }
        }
        Err(e) => warn!("Cannot list {}: {}", settings.data_dir, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = match std::env::args().nth(1) {
        Some(path) => SettingsService::load_from(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = init_logging(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting {} node simulator (settings {})",
        settings.device_name,
        settings_service.settings_path().display()
    );

    let storage = FsStorage::new(&settings.storage_root).with_context(|| {
        format!("opening storage at {}", settings.storage_root.display())
    })?;
    dump_storage(&storage, &settings);

    let registry = ChannelRegistry::from_profile(&settings.gatt)?;
    let transport = LoopbackTransport::new(registry);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let peer = transport.peer(event_tx);

    let mut node = Node::new(
        NodeConfig::from(&settings),
        Box::new(transport),
        Box::new(storage),
        Box::new(SimulatedImu::default()),
        Box::new(MonotonicTicks::new()),
        event_rx,
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.tick_interval_ms.max(1)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.tick();
                for publication in peer.take_publications() {
                    log_publication(&publication);
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(&line) {
                    Ok(command) => {
                        if !execute(&mut node, &peer, command) {
                            break;
                        }
                    }
                    Err(e) => warn!("{:#}", e),
                }
            }
        }
    }

    node.exit();
    info!("Simulator stopped");
    Ok(())
}
