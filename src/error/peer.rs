pub use tokio::{io::Error as IoError, sync::mpsc::error::SendError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("received unexpected bitfield")]
    /// The bitfield message was not sent after the handshake.
    /// According to the protocol,
    /// it should only be accepted after the handshake
    /// and when received at any other time, connection is severed.
    BitfieldNotAfterHandshake,

    #[error("channel error")]
    /// The channel on which some component in engine
    /// was listening or sending  died.
    Channel,

    #[error("inactivity timeout")]
    /// A peer session timed out because neither side of the
    /// connection became interested in each other.
    InactivityTimeout,

    #[error("connect timed out")]
    /// The outbound TCP connect didn't complete within the configured
    /// timeout.
    ConnectTimeout,

    #[error("invalid block info")]
    /// The block information the peer sent is invalid.
    InvalidBlockInfo,

    #[error("invalid piece index")]
    /// The block's piece index is invalid.
    InvalidPieceIndex,

    #[error("invalid bitfield length")]
    /// A `Bitfield` message's payload didn't match `ceil(piece_count / 8)`
    /// bytes.
    InvalidBitfieldLength,

    #[error("invalid info hash")]
    /// Peer's torrent info hash did not match ours.
    InvalidInfoHash,

    #[error("invalid protocol string")]
    /// The handshake's `pstr` was not "BitTorrent protocol".
    InvalidProtocol,

    #[error("{0}")]
    /// A failure in the storage layer surfaced while serving a request or
    /// completing a piece.
    Storage(crate::error::disk::StorageError),

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<crate::error::disk::StorageError> for PeerError {
    fn from(value: crate::error::disk::StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<IoError> for PeerError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for PeerError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}
