use tokio::io::Error as IoError;
use tokio::sync::mpsc::error::SendError;

pub type Result<T, E = TorrentError> =
    std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("channel error")]
    /// The channel on which some component in engine was
    /// listening or sending died.
    Channel,

    #[error("multi-file torrents are not supported")]
    /// The metainfo described more than one file. Single-file torrents only.
    MultiFileUnsupported,

    #[error("invalid piece length")]
    /// The piece length is zero, or the number of piece hashes in the
    /// metainfo doesn't match the piece count implied by the total length.
    InvalidPieceLength,

    #[error("piece {0} already have")]
    /// A completion was reported for a piece already marked as have. This is
    /// not itself fatal (duplicate end-game completions are expected) but is
    /// surfaced so callers can decide whether to log it.
    DuplicatePiece(crate::PieceIndex),

    #[error("{0}")]
    /// A failure propagated up from the [`crate::storage::Storage`] backing
    /// this torrent.
    Storage(crate::error::disk::StorageError),

    #[error("{0}")]
    /// An Io error occurred.
    Io(std::io::Error),
}

impl From<crate::error::disk::StorageError> for TorrentError {
    fn from(value: crate::error::disk::StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<IoError> for TorrentError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for TorrentError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}
