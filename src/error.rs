//! Error types for the SwIMU node core

use crate::domain::models::{Mode, SessionKind};
use crate::infrastructure::bluetooth::protocol::Channel;
use thiserror::Error;

/// The captured timestamp did not parse as six `_`-separated integer fields.
///
/// Returned as a value; the clock keeps its previous captured state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid datetime format: {fields_parsed} fields recognized in {raw:?}")]
pub struct ClockFormatError {
    pub fields_parsed: usize,
    pub raw: String,
}

/// Failures reported by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("payload of {len} bytes exceeds the {cap}-byte cap of {channel:?}")]
    PayloadTooLarge {
        channel: Channel,
        len: usize,
        cap: usize,
    },
}

/// Errors surfaced by the node core
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot enter {requested:?} while {current:?} is active")]
    WrongMode { current: Mode, requested: SessionKind },

    #[error("file transfer already in progress (cursor at {cursor})")]
    TransferInProgress { cursor: usize },

    #[error("no files pending transfer")]
    ManifestEmpty,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Clock(#[from] ClockFormatError),

    #[error("invalid characteristic UUID {value:?}: {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

pub type Result<T> = std::result::Result<T, NodeError>;
