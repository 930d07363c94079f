//! Unified error type for the Meshroom crates.

use std::path::PathBuf;

use meshroom_peer::PeerError;
use meshroom_protocol::ProtocolError;
use meshroom_room::{GateError, RoomError};
use meshroom_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `meshroom` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate. The
/// `#[from]` attributes let `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MeshroomError {
    /// Network lifecycle or send failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode or decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Election or directory error.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// An outbound send was refused or gave up.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// A room command failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The persisted identity file couldn't be read or written.
    #[error("identity file {}: {source}", path.display())]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file couldn't be read.
    #[error("config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON file (identity or config) didn't parse.
    #[error("malformed {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
