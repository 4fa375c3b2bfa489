pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Error type returned by [`crate::storage::Storage`] implementations.
///
/// This is non-fatal for a single request: a failed `read_piece` is logged
/// and the request is dropped, while a failed `write_piece` is propagated to
/// `TorrentController` so it can decide whether to re-request the piece.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid piece index")]
    /// The piece index is out of bounds for the torrent.
    InvalidPieceIndex,

    #[error("background storage task panicked")]
    /// The `spawn_blocking` task performing the IO was cancelled or
    /// panicked.
    TaskJoin,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}
