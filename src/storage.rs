//! The storage contract and a single-file reference implementation.
//!
//! Durable piece bytes and have-set persistence are external collaborators
//! to the peer-swarm engine: the engine only calls through [`Storage`].
//! [`FileStorage`] is provided so the engine is runnable and testable end to
//! end, but its own correctness (fsync policy, disk scheduling) is not the
//! subject of this crate — callers are free to substitute their own
//! [`Storage`] impl (e.g. one backed by a multi-file layout) without
//! touching the swarm engine at all.
//!
//! `Storage` methods are synchronous: they perform blocking file IO and are
//! always invoked through `tokio::task::spawn_blocking` by callers (mirroring
//! how the teacher's disk task keeps blocking IO off the reactor), rather
//! than being `async fn` themselves.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{error::disk::StorageError, torrent::descriptor::TorrentDescriptor, Bitfield, PieceIndex};

/// The durable-storage contract the engine writes completed pieces to and
/// reads pieces from (to serve uploads), and which persists the have-set.
pub trait Storage: Send + Sync + 'static {
    /// Writes a verified piece's bytes to durable storage at the position
    /// implied by `index` and the configured `piece_length`.
    fn write_piece(&self, piece_length: u32, index: PieceIndex, bytes: &[u8]) -> Result<(), StorageError>;

    /// Reads back a previously written piece of `len` bytes.
    fn read_piece(&self, piece_length: u32, index: PieceIndex, len: usize) -> Result<Vec<u8>, StorageError>;

    /// Persists the full have-set. Called after every successful
    /// `write_piece` so that a `have_set` read immediately afterwards
    /// reflects the piece's durability.
    fn write_meta(&self, have: &Bitfield) -> Result<(), StorageError>;

    /// Reads back the last persisted have-set, or an all-false bitfield if
    /// none has ever been persisted.
    fn read_meta(&self, piece_count: usize) -> Result<Bitfield, StorageError>;
}

/// A `Storage` implementation backed by a single pre-allocated file plus a
/// sidecar manifest file holding the persisted have-set.
pub struct FileStorage {
    file: Mutex<File>,
    meta_path: PathBuf,
}

impl FileStorage {
    /// Opens (creating if necessary) the output file at
    /// `download_dir/descriptor.name`, pre-allocated to the descriptor's
    /// total length, plus a `.have` sidecar manifest beside it.
    pub fn new(descriptor: &TorrentDescriptor, download_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = download_dir.as_ref().join(&descriptor.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(StorageError::Io)?;
        file.set_len(descriptor.total_len).map_err(StorageError::Io)?;

        let mut meta_path = path.clone();
        let mut file_name = meta_path.file_name().unwrap_or_default().to_owned();
        file_name.push(".have");
        meta_path.set_file_name(file_name);

        Ok(Self {
            file: Mutex::new(file),
            meta_path,
        })
    }
}

impl Storage for FileStorage {
    fn write_piece(&self, piece_length: u32, index: PieceIndex, bytes: &[u8]) -> Result<(), StorageError> {
        let offset = index as u64 * piece_length as u64;
        let mut file = self.file.lock().expect("storage file lock poisoned");
        file.seek(SeekFrom::Start(offset)).map_err(StorageError::Io)?;
        file.write_all(bytes).map_err(StorageError::Io)?;
        Ok(())
    }

    fn read_piece(&self, piece_length: u32, index: PieceIndex, len: usize) -> Result<Vec<u8>, StorageError> {
        let offset = index as u64 * piece_length as u64;
        let mut file = self.file.lock().expect("storage file lock poisoned");
        file.seek(SeekFrom::Start(offset)).map_err(StorageError::Io)?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(StorageError::Io)?;
        Ok(buf)
    }

    fn write_meta(&self, have: &Bitfield) -> Result<(), StorageError> {
        std::fs::write(&self.meta_path, have.clone().into_vec()).map_err(StorageError::Io)
    }

    fn read_meta(&self, piece_count: usize) -> Result<Bitfield, StorageError> {
        let mut bitfield = match std::fs::read(&self.meta_path) {
            Ok(bytes) => Bitfield::from_vec(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Bitfield::repeat(false, piece_count),
            Err(e) => return Err(StorageError::Io(e)),
        };
        bitfield.resize(piece_count, false);
        Ok(bitfield)
    }
}
