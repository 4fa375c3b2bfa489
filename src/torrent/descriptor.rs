//! The immutable, parsed description of a single-file torrent.
//!
//! This is the engine's view of a `.torrent` file: it is built once (from a
//! [`crate::metainfo::Metainfo`]) and never mutated afterwards. All piece
//! length math is centralized here so that "the descriptor's piece length is
//! authoritative" (rather than some value re-derived and cached elsewhere)
//! holds as an invariant throughout the rest of the engine.

use url::Url;

use crate::{error::torrent::TorrentError, metainfo::Metainfo, PieceIndex, Sha1Hash};

/// Describes a single-file torrent: its trackers, info hash, piece layout and
/// suggested output filename.
///
/// Constructing a [`TorrentDescriptor`] from a multi-file [`Metainfo`] fails
/// with [`TorrentError::MultiFileUnsupported`] — multi-file torrents are a
/// documented non-goal of this engine.
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    /// Trackers to announce to, in the order the metainfo listed them.
    pub trackers: Vec<Url>,
    /// The torrent's 20 byte SHA-1 info hash.
    pub info_hash: Sha1Hash,
    /// The length, in bytes, of every piece except possibly the last.
    pub piece_len: u32,
    /// The total length of the (single) file, in bytes.
    pub total_len: u64,
    /// The SHA-1 hash of each piece, in order.
    pub piece_hashes: Vec<Sha1Hash>,
    /// The suggested filename for the downloaded content.
    pub name: String,
}

impl TorrentDescriptor {
    /// Builds a descriptor from parsed metainfo, rejecting anything but a
    /// single-file torrent.
    pub fn from_metainfo(metainfo: Metainfo) -> Result<Self, TorrentError> {
        if metainfo.is_archive() {
            return Err(TorrentError::MultiFileUnsupported);
        }
        let file = metainfo
            .files
            .first()
            .ok_or(TorrentError::MultiFileUnsupported)?;
        let total_len = file.len;

        let piece_len = metainfo.piece_len as u32;
        if piece_len == 0 {
            return Err(TorrentError::InvalidPieceLength);
        }

        let piece_hashes = metainfo
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect::<Vec<_>>();

        let expected_piece_count = Self::piece_count_of(total_len, piece_len as u64);
        if piece_hashes.len() != expected_piece_count {
            return Err(TorrentError::InvalidPieceLength);
        }

        Ok(Self {
            trackers: metainfo.trackers,
            info_hash: metainfo.info_hash,
            piece_len,
            total_len,
            piece_hashes,
            name: metainfo.name,
        })
    }

    fn piece_count_of(total_len: u64, piece_len: u64) -> usize {
        ((total_len + piece_len - 1) / piece_len) as usize
    }

    /// The number of pieces `P` in this torrent.
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Returns the authoritative length, in bytes, of the piece at `index`.
    ///
    /// The last piece is `((N-1) mod L) + 1` bytes long; every other piece is
    /// exactly `piece_len` bytes long.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        assert!(index < self.piece_count(), "piece index out of bounds");
        if index == self.piece_count() - 1 {
            let remainder = (self.total_len - 1) % self.piece_len as u64 + 1;
            remainder as u32
        } else {
            self.piece_len
        }
    }

    /// Returns the byte offset of the start of piece `index` within the
    /// file.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        index as u64 * self.piece_len as u64
    }

    /// Returns the expected SHA-1 hash of the piece at `index`.
    pub fn piece_hash(&self, index: PieceIndex) -> Sha1Hash {
        self.piece_hashes[index]
    }
}
