//! Global per-torrent state: which pieces we have, want, and have scheduled,
//! and the single gateway through which completed pieces reach [`crate::storage::Storage`].
//!
//! Owned once per torrent and shared (via `Arc`) between the
//! [`crate::torrent::swarm::SwarmCoordinator`] and every live
//! [`crate::peer::session::PeerSession`], mirroring the teacher's
//! `Arc<SharedStatus>` handed to every `PeerSession`.

use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{Arc, Mutex, RwLock},
};

use lru::LruCache;

use crate::{
    error::{disk::StorageError, torrent::TorrentError},
    storage::Storage,
    torrent::descriptor::TorrentDescriptor,
    Bitfield, PieceIndex,
};

/// How many recently-completed pieces are kept in memory so that several
/// peers requesting the same piece in quick succession don't each force a
/// disk read. Not user-configurable: it is purely an implementation detail
/// of the read path, not a resource bound the caller needs to reason about.
const PIECE_CACHE_CAPACITY: usize = 8;

pub struct TorrentController {
    pub descriptor: TorrentDescriptor,
    storage: Arc<dyn Storage>,
    have: RwLock<Bitfield>,
    want: Mutex<HashSet<PieceIndex>>,
    pending: Mutex<HashSet<PieceIndex>>,
    cache: Mutex<LruCache<PieceIndex, Arc<Vec<u8>>>>,
}

impl TorrentController {
    /// Builds a controller for `descriptor`, seeding `have`/`want` from
    /// whatever manifest the storage backend has persisted (an empty one for
    /// a torrent that has never been downloaded before).
    pub async fn new(
        descriptor: TorrentDescriptor,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<Self>, TorrentError> {
        let piece_count = descriptor.piece_count();
        let storage_for_read = storage.clone();
        let have = tokio::task::spawn_blocking(move || storage_for_read.read_meta(piece_count))
            .await
            .map_err(|_| StorageError::TaskJoin)??;

        let mut want = HashSet::with_capacity(piece_count);
        for index in 0..piece_count {
            if !bit(&have, index) {
                want.insert(index);
            }
        }

        Ok(Arc::new(Self {
            descriptor,
            storage,
            have: RwLock::new(have),
            want: Mutex::new(want),
            pending: Mutex::new(HashSet::new()),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PIECE_CACHE_CAPACITY).expect("nonzero cache capacity"),
            )),
        }))
    }

    /// Whether every piece has been verified and written to storage.
    pub fn is_complete(&self) -> bool {
        self.have.read().expect("have lock poisoned").count_ones() == self.descriptor.piece_count()
    }

    /// A point-in-time copy of the have set, used to build a session's
    /// initial `Bitfield` message.
    pub fn have_snapshot(&self) -> Bitfield {
        self.have.read().expect("have lock poisoned").clone()
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        bit(&self.have.read().expect("have lock poisoned"), index)
    }

    /// Whether `want` is currently empty, i.e. every remaining piece is
    /// already scheduled somewhere and the swarm has entered end-game.
    pub fn want_is_empty(&self) -> bool {
        self.want.lock().expect("want lock poisoned").is_empty()
    }

    pub fn want_snapshot(&self) -> HashSet<PieceIndex> {
        self.want.lock().expect("want lock poisoned").clone()
    }

    pub fn pending_snapshot(&self) -> HashSet<PieceIndex> {
        self.pending.lock().expect("pending lock poisoned").clone()
    }

    /// Whether any piece in `want` is set in `has`, used by download
    /// selection without materializing the whole `want` set.
    pub fn has_common_with_want(&self, has: &Bitfield) -> bool {
        self.want
            .lock()
            .expect("want lock poisoned")
            .iter()
            .any(|index| bit(has, *index))
    }

    /// Moves a piece from `want` to `pending`. A no-op on `want` if the
    /// piece was already removed (end-game: it may be scheduled on more than
    /// one session at a time).
    pub fn on_piece_downloading(&self, index: PieceIndex) {
        self.want.lock().expect("want lock poisoned").remove(&index);
        self.pending.lock().expect("pending lock poisoned").insert(index);
    }

    /// Verifies and writes a completed piece.
    ///
    /// Returns `Ok(true)` the first time `index` completes, and `Ok(false)`
    /// for a duplicate completion (expected in end-game, where the same
    /// piece may be in flight on several sessions at once).
    pub async fn on_piece_downloaded(
        self: &Arc<Self>,
        index: PieceIndex,
        data: Vec<u8>,
    ) -> Result<bool, TorrentError> {
        if self.has_piece(index) {
            return Ok(false);
        }

        let storage = self.storage.clone();
        let piece_len = self.descriptor.piece_len(index);
        let data = Arc::new(data);
        let write_data = data.clone();
        tokio::task::spawn_blocking(move || storage.write_piece(piece_len, index, &write_data))
            .await
            .map_err(|_| StorageError::TaskJoin)??;

        let have_snapshot = {
            let mut have = self.have.write().expect("have lock poisoned");
            if bit(&have, index) {
                // lost a race with another completion of the same piece
                return Ok(false);
            }
            have.set(index, true);
            have.clone()
        };

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.write_meta(&have_snapshot))
            .await
            .map_err(|_| StorageError::TaskJoin)??;

        self.pending.lock().expect("pending lock poisoned").remove(&index);
        self.cache.lock().expect("cache lock poisoned").put(index, data);

        Ok(true)
    }

    /// Reads back a piece we've verified and completed, through a small LRU
    /// cache to absorb repeated requests for a just-completed piece.
    pub async fn read_piece(self: &Arc<Self>, index: PieceIndex) -> Result<Arc<Vec<u8>>, StorageError> {
        if !self.has_piece(index) {
            return Err(StorageError::InvalidPieceIndex);
        }

        if let Some(cached) = self.cache.lock().expect("cache lock poisoned").get(&index) {
            return Ok(cached.clone());
        }

        let storage = self.storage.clone();
        let piece_len = self.descriptor.piece_len(index);
        let len = piece_len as usize;
        let bytes =
            tokio::task::spawn_blocking(move || storage.read_piece(piece_len, index, len))
                .await
                .map_err(|_| StorageError::TaskJoin)??;

        let bytes = Arc::new(bytes);
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .put(index, bytes.clone());
        Ok(bytes)
    }
}

fn bit(bitfield: &Bitfield, index: usize) -> bool {
    bitfield.get(index).map(|b| *b).unwrap_or(false)
}
