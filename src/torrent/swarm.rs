//! Coordinates every live [`PeerSession`] for a single torrent: which peers
//! are connected, which ones we're downloading from or uploading to, and the
//! piece and choke/interest selection policy that drives both.
//!
//! The coordinator never touches a session's socket or buffers directly; it
//! only holds a [`crate::event::CommandSender`] per peer and reacts to
//! [`SwarmEvent`]s, mirroring the teacher's ownership-by-handle split between
//! `torrent/mod.rs` and `peer.rs`.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use rand::seq::SliceRandom;

use crate::{
    alert::{Alert, AlertSender},
    avg::SlidingAvg,
    conf::TorrentConf,
    error::peer::PeerError,
    event::{
        CommandSender, EventReceiver, EventSender, RegisterReceiver, ShutdownReceiver,
        SessionCommand, SwarmEvent,
    },
    peer::session::PeerSession,
    torrent::controller::TorrentController,
    Bitfield, PeerId, PieceIndex, Sha1Hash, TorrentId,
};

/// How many recently-completed pieces the rolling download rate is averaged
/// over.
const RATE_WINDOW_PIECES: usize = 100;

/// A candidate peer as reported by the tracker: an address and, for
/// full (non-compact) tracker responses, the peer id it announced.
#[derive(Debug, Clone, Copy)]
pub struct PeerRecord {
    pub addr: SocketAddr,
    pub peer_id: Option<PeerId>,
}

/// What the coordinator knows about one live session.
struct SessionHandle {
    cmd_tx: CommandSender,
    peer_id: Option<PeerId>,
    has: Bitfield,
    peer_interested: bool,
}

pub struct SwarmCoordinator {
    id: TorrentId,
    conf: TorrentConf,
    controller: Arc<TorrentController>,
    client_id: PeerId,
    info_hash: Sha1Hash,
    /// Peers we haven't connected to yet, shuffled so repeated runs don't
    /// always hammer the same handful of addresses first.
    candidates: VecDeque<PeerRecord>,
    sessions: HashMap<SocketAddr, SessionHandle>,
    connected: HashSet<SocketAddr>,
    downloading_from: HashSet<SocketAddr>,
    uploading_to: HashSet<SocketAddr>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    register_rx: RegisterReceiver,
    shutdown_rx: ShutdownReceiver,
    alert_tx: AlertSender,
    complete_alerted: bool,
    /// Where the torrent's output file is written, reported in the
    /// completion alert.
    output_path: PathBuf,
    started_at: Instant,
    last_piece_completed_at: Instant,
    /// Download rate in bytes/sec, rolled over the last
    /// [`RATE_WINDOW_PIECES`] completed pieces.
    piece_rate: SlidingAvg,
}

impl SwarmCoordinator {
    /// Builds a coordinator along with the [`EventSender`] that
    /// [`crate::torrent::acceptor::ServerAcceptor`] should hand to every
    /// inbound session it accepts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TorrentId,
        controller: Arc<TorrentController>,
        client_id: PeerId,
        info_hash: Sha1Hash,
        conf: TorrentConf,
        candidates: Vec<PeerRecord>,
        register_rx: RegisterReceiver,
        shutdown_rx: ShutdownReceiver,
        alert_tx: AlertSender,
        output_path: PathBuf,
    ) -> (Self, EventSender) {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut candidates: VecDeque<PeerRecord> = candidates.into();
        candidates.make_contiguous().shuffle(&mut rand::thread_rng());

        let now = Instant::now();
        let coordinator = Self {
            id,
            conf,
            controller,
            client_id,
            info_hash,
            candidates,
            sessions: HashMap::new(),
            connected: HashSet::new(),
            downloading_from: HashSet::new(),
            uploading_to: HashSet::new(),
            events_tx: events_tx.clone(),
            events_rx,
            register_rx,
            shutdown_rx,
            alert_tx,
            complete_alerted: false,
            output_path,
            started_at: now,
            last_piece_completed_at: now,
            piece_rate: SlidingAvg::new(RATE_WINDOW_PIECES),
        };
        (coordinator, events_tx)
    }

    /// Drives the swarm until its event channel closes (i.e. every session
    /// has exited and the torrent was asked to stop producing new ones), or
    /// until the engine asks it to shut down.
    pub async fn run(mut self) {
        self.spawn_initial_connects();

        let mut register_open = true;
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some((addr, event)) => self.handle_event(addr, event).await,
                        None => break,
                    }
                }
                reg = self.register_rx.recv(), if register_open => {
                    match reg {
                        Some((addr, cmd_tx)) => self.register_inbound(addr, cmd_tx),
                        None => register_open = false,
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    log::info!("torrent {} shutting down", self.id);
                    self.broadcast_shutdown();
                    break;
                }
            }
        }
    }

    fn broadcast_shutdown(&self) {
        for handle in self.sessions.values() {
            let _ = handle.cmd_tx.send(SessionCommand::Shutdown);
        }
    }

    fn spawn_initial_connects(&mut self) {
        self.top_off_connects();
    }

    fn top_off_connects(&mut self) {
        while self.sessions.len() < self.conf.max_active_connections {
            match self.candidates.pop_front() {
                Some(record) => {
                    if self.sessions.contains_key(&record.addr) {
                        continue;
                    }
                    self.spawn_outbound(record);
                }
                None => {
                    log::debug!("no more candidate peers to connect to");
                    break;
                }
            }
        }
    }

    fn spawn_outbound(&mut self, record: PeerRecord) {
        let (session, cmd_tx) = PeerSession::outbound(
            record.addr,
            record.peer_id,
            self.info_hash,
            self.client_id,
            self.controller.clone(),
            self.conf.clone(),
            self.events_tx.clone(),
        );
        self.sessions.insert(
            record.addr,
            SessionHandle {
                cmd_tx,
                peer_id: record.peer_id,
                has: Bitfield::repeat(false, self.controller.descriptor.piece_count()),
                peer_interested: false,
            },
        );
        tokio::spawn(session.start_outbound());
    }

    fn register_inbound(&mut self, addr: SocketAddr, cmd_tx: CommandSender) {
        self.sessions.insert(
            addr,
            SessionHandle {
                cmd_tx,
                peer_id: None,
                has: Bitfield::repeat(false, self.controller.descriptor.piece_count()),
                peer_interested: false,
            },
        );
    }

    async fn handle_event(&mut self, addr: SocketAddr, event: SwarmEvent) {
        match event {
            SwarmEvent::Connected { peer_id } => self.on_connect(addr, peer_id),
            SwarmEvent::Panic { reason } => self.on_panic(addr, reason),
            SwarmEvent::Available => self.on_available(addr),
            SwarmEvent::Interested => self.on_interested(addr),
            SwarmEvent::NotInterested => self.on_not_interested(addr),
            SwarmEvent::HasUpdated { has } => self.on_has_updated(addr, has),
            SwarmEvent::PieceDownloaded { index, data } => {
                self.on_piece_downloaded(addr, index, data).await;
            }
        }
    }

    fn on_connect(&mut self, addr: SocketAddr, peer_id: Option<PeerId>) {
        self.connected.insert(addr);
        if let Some(handle) = self.sessions.get_mut(&addr) {
            if peer_id.is_some() {
                handle.peer_id = peer_id;
            }
        }
        log::info!("connected to peer {addr}");
        self.run_download_selection();
        self.run_upload_selection();
    }

    fn on_panic(&mut self, addr: SocketAddr, reason: PeerError) {
        log::warn!("session with {addr} ended: {reason}");
        let handle = self.sessions.remove(&addr);
        self.connected.remove(&addr);
        self.downloading_from.remove(&addr);
        self.uploading_to.remove(&addr);

        let peer_id = handle.and_then(|h| h.peer_id);
        self.candidates.push_front(PeerRecord { addr, peer_id });

        self.top_off_connects();
        self.run_download_selection();
        self.run_upload_selection();
    }

    fn on_available(&mut self, addr: SocketAddr) {
        if !self.connected.contains(&addr) {
            return;
        }
        let Some(handle) = self.sessions.get(&addr) else {
            return;
        };

        let want_empty = self.controller.want_is_empty();
        let target = if !want_empty {
            self.controller.want_snapshot()
        } else {
            self.controller.pending_snapshot()
        };

        let chosen = target.iter().copied().find(|index| bit(&handle.has, *index));

        match chosen {
            None => {
                self.downloading_from.remove(&addr);
                if let Some(handle) = self.sessions.get(&addr) {
                    let _ = handle.cmd_tx.send(SessionCommand::SetInterested(false));
                }
                self.run_download_selection();
            }
            Some(index) => {
                self.controller.on_piece_downloading(index);
                if let Some(handle) = self.sessions.get(&addr) {
                    let _ = handle.cmd_tx.send(SessionCommand::SchedulePieceDownload(index));
                }
            }
        }
    }

    fn on_interested(&mut self, addr: SocketAddr) {
        if let Some(handle) = self.sessions.get_mut(&addr) {
            handle.peer_interested = true;
        }
        self.run_upload_selection();
    }

    fn on_not_interested(&mut self, addr: SocketAddr) {
        if let Some(handle) = self.sessions.get_mut(&addr) {
            handle.peer_interested = false;
        }
        self.uploading_to.remove(&addr);
        self.run_upload_selection();
    }

    fn on_has_updated(&mut self, addr: SocketAddr, has: Bitfield) {
        if let Some(handle) = self.sessions.get_mut(&addr) {
            handle.has = has;
        }
        self.run_download_selection();
    }

    async fn on_piece_downloaded(&mut self, addr: SocketAddr, index: PieceIndex, data: Vec<u8>) {
        match self.controller.on_piece_downloaded(index, data).await {
            Ok(true) => {
                self.report_progress(index);
                if !self.complete_alerted && self.controller.is_complete() {
                    self.complete_alerted = true;
                    self.report_completion();
                }
                self.broadcast_have(index);
                self.downloading_from.remove(&addr);
                self.run_download_selection();
            }
            Ok(false) => {
                // a duplicate completion, expected during end-game.
            }
            Err(e) => {
                log::error!("failed to persist piece {index}: {e}");
            }
        }
    }

    /// Logs and alerts on progress after `index` has just completed:
    /// percentage of pieces had, a download rate rolled over the last
    /// [`RATE_WINDOW_PIECES`] completions, and an ETA derived from it.
    fn report_progress(&mut self, index: PieceIndex) {
        let now = Instant::now();
        let elapsed_since_last = now.duration_since(self.last_piece_completed_at);
        self.last_piece_completed_at = now;

        let piece_len = self.controller.descriptor.piece_len(index) as f64;
        let secs = elapsed_since_last.as_secs_f64().max(0.001);
        self.piece_rate.update((piece_len / secs) as i64);
        let rate = self.piece_rate.mean().max(0) as u64;

        let total = self.controller.descriptor.piece_count();
        let have = self.controller.have_snapshot().count_ones();
        let percent = have as f64 / total as f64 * 100.0;

        let eta = if rate > 0 {
            let descriptor = &self.controller.descriptor;
            let avg_piece_len = descriptor.total_len / total as u64;
            let remaining_bytes = (total - have) as u64 * avg_piece_len;
            Some(Duration::from_secs(remaining_bytes / rate))
        } else {
            None
        };

        log::info!(
            "piece {index} complete: {percent:.1}% done, {rate} B/s, eta {eta:?}"
        );
        let _ = self.alert_tx.send(Alert::Progress {
            id: self.id,
            percent,
            rate_bytes_per_sec: rate,
            eta,
        });
    }

    fn report_completion(&self) {
        let elapsed = self.started_at.elapsed();
        log::info!(
            "torrent {} complete in {elapsed:?}, saved to {}, continuing to seed",
            self.id,
            self.output_path.display(),
        );
        let _ = self.alert_tx.send(Alert::TorrentComplete {
            id: self.id,
            elapsed,
            output_path: self.output_path.clone(),
        });
    }

    fn broadcast_have(&self, index: PieceIndex) {
        for addr in &self.connected {
            if let Some(handle) = self.sessions.get(addr) {
                let _ = handle.cmd_tx.send(SessionCommand::AnnounceHave(index));
            }
        }
    }

    /// While under `max_downloading_from`, marks interest on any connected
    /// session that has something we still want.
    fn run_download_selection(&mut self) {
        if self.controller.want_is_empty() {
            return;
        }
        while self.downloading_from.len() < self.conf.max_downloading_from {
            let next = self
                .connected
                .iter()
                .filter(|addr| !self.downloading_from.contains(*addr))
                .find(|addr| {
                    self.sessions
                        .get(*addr)
                        .is_some_and(|handle| self.controller.has_common_with_want(&handle.has))
                })
                .copied();

            match next {
                Some(addr) => {
                    self.downloading_from.insert(addr);
                    if let Some(handle) = self.sessions.get(&addr) {
                        let _ = handle.cmd_tx.send(SessionCommand::SetInterested(true));
                    }
                }
                None => break,
            }
        }
    }

    /// While under `max_uploading_to`, unchokes sessions already in
    /// `downloading_from` first (tit-for-tat), then any other interested
    /// peer.
    fn run_upload_selection(&mut self) {
        while self.uploading_to.len() < self.conf.max_uploading_to {
            let next = self
                .downloading_from
                .iter()
                .find(|addr| !self.uploading_to.contains(*addr) && self.connected.contains(*addr))
                .copied()
                .or_else(|| {
                    self.connected
                        .iter()
                        .find(|addr| {
                            !self.uploading_to.contains(*addr)
                                && self.sessions.get(*addr).is_some_and(|h| h.peer_interested)
                        })
                        .copied()
                });

            match next {
                Some(addr) => {
                    self.uploading_to.insert(addr);
                    if let Some(handle) = self.sessions.get(&addr) {
                        let _ = handle.cmd_tx.send(SessionCommand::SetChoking(false));
                    }
                }
                None => break,
            }
        }
    }
}

fn bit(bitfield: &Bitfield, index: usize) -> bool {
    bitfield.get(index).map(|b| *b).unwrap_or(false)
}
