//! The per-connection state machine: connect, handshake, message dispatch,
//! request issuance, and request serving.
//!
//! A [`PeerSession`] exclusively owns its socket, read buffer and in-flight
//! [`PieceAssembler`]. It never reaches back into [`crate::torrent::swarm`]
//! directly; all coordination happens by sending [`SwarmEvent`]s upstream and
//! receiving [`SessionCommand`]s downstream, mirroring the handle-passing
//! style of the teacher's `peer.rs`/`torrent/mod.rs` split.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    blockinfo::{block_count, block_len, BlockInfo},
    conf::TorrentConf,
    counter::ThruputCounters,
    error::peer::PeerError,
    event::{CommandReceiver, EventSender, SessionCommand, SwarmEvent},
    peer::{
        codec::{
            handshake::{Handshake, HandshakeCodec, PROTOCOL_STRING},
            message::Message,
            peercodec::PeerCodec,
        },
        piece_assembler::{BlockOutcome, BlockRejection, PieceAssembler},
    },
    torrent::controller::TorrentController,
    Bitfield, PeerId, PieceIndex, Sha1Hash, BLOCK_LEN,
};

type MessageSink = futures::stream::SplitSink<Framed<TcpStream, PeerCodec>, Message>;
type MessageStream = futures::stream::SplitStream<Framed<TcpStream, PeerCodec>>;

/// How often a session rolls its [`ThruputCounters`] forward.
const THRUPUT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Where a session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Connecting,
    Connected,
    HandshakeSent,
    HandshakeAcked,
    Active,
    Closed,
    Failed,
}

/// The choke/interest flags each side of a session tracks, plus whether a
/// `Bitfield` is still a legal next message.
#[derive(Debug, Clone, Copy)]
struct Status {
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
    /// Set once any non-handshake message has been processed. A `Bitfield`
    /// arriving after this is a protocol violation.
    received_non_handshake: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            received_non_handshake: false,
        }
    }
}

pub struct PeerSession {
    addr: SocketAddr,
    info_hash: Sha1Hash,
    client_id: PeerId,
    controller: Arc<TorrentController>,
    conf: TorrentConf,
    events: EventSender,
    commands: CommandReceiver,
    state: State,
    status: Status,
    /// The peer's id, either hinted by the tracker (outbound) or learned from
    /// its handshake (always, once one is received).
    peer_id: Option<PeerId>,
    /// The peer's last known piece availability.
    has: Bitfield,
    /// The single in-flight piece download on this session, if any.
    assembly: Option<(PieceIndex, PieceAssembler)>,
    counters: ThruputCounters,
}

impl PeerSession {
    fn new(
        addr: SocketAddr,
        peer_id_hint: Option<PeerId>,
        info_hash: Sha1Hash,
        client_id: PeerId,
        controller: Arc<TorrentController>,
        conf: TorrentConf,
        events: EventSender,
    ) -> (Self, crate::event::CommandSender) {
        let (commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let piece_count = controller.descriptor.piece_count();
        let session = Self {
            addr,
            info_hash,
            client_id,
            controller,
            conf,
            events,
            commands: commands_rx,
            state: State::Created,
            status: Status::default(),
            peer_id: peer_id_hint,
            has: Bitfield::repeat(false, piece_count),
            assembly: None,
            counters: ThruputCounters::default(),
        };
        (session, commands_tx)
    }

    /// Builds a session that will actively connect out to `addr`.
    /// `peer_id_hint` is the id the tracker reported for this peer, if any.
    pub fn outbound(
        addr: SocketAddr,
        peer_id_hint: Option<PeerId>,
        info_hash: Sha1Hash,
        client_id: PeerId,
        controller: Arc<TorrentController>,
        conf: TorrentConf,
        events: EventSender,
    ) -> (Self, crate::event::CommandSender) {
        Self::new(addr, peer_id_hint, info_hash, client_id, controller, conf, events)
    }

    /// Builds a session for a socket [`crate::torrent::acceptor::ServerAcceptor`]
    /// just accepted. The peer's id is unknown until its handshake arrives.
    pub fn inbound(
        addr: SocketAddr,
        info_hash: Sha1Hash,
        client_id: PeerId,
        controller: Arc<TorrentController>,
        conf: TorrentConf,
        events: EventSender,
    ) -> (Self, crate::event::CommandSender) {
        Self::new(addr, None, info_hash, client_id, controller, conf, events)
    }

    /// Connects out to the peer and runs the session to completion.
    pub async fn start_outbound(mut self) {
        let outcome = self.connect_and_run().await;
        self.finish(outcome);
    }

    /// Runs the session to completion on an already-accepted socket.
    pub async fn start_inbound(mut self, socket: TcpStream) {
        let outcome = self.run_session(socket).await;
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Result<(), PeerError>) {
        match outcome {
            Ok(()) => {
                self.state = State::Closed;
                log::debug!("peer session {} closed", self.addr);
            }
            Err(reason) => {
                self.state = State::Closed;
                log::warn!("peer session {} ended: {reason}", self.addr);
                let _ = self.events.send((self.addr, SwarmEvent::Panic { reason }));
            }
        }
    }

    async fn connect_and_run(&mut self) -> Result<(), PeerError> {
        self.state = State::Connecting;
        let socket = match tokio::time::timeout(self.conf.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                self.state = State::Failed;
                return Err(e.into());
            }
            Err(_) => {
                self.state = State::Failed;
                return Err(PeerError::ConnectTimeout);
            }
        };
        self.run_session(socket).await
    }

    /// Handshakes, switches codecs, sends our bitfield, and runs the message
    /// loop. Shared between the outbound and inbound entry points.
    async fn run_session(&mut self, socket: TcpStream) -> Result<(), PeerError> {
        self.state = State::Connected;

        let mut hs_framed = Framed::new(socket, HandshakeCodec);
        hs_framed
            .send(Handshake::new(self.info_hash, self.client_id))
            .await?;
        self.state = State::HandshakeSent;

        let peer_handshake = tokio::time::timeout(self.conf.read_timeout, hs_framed.next())
            .await
            .map_err(|_| PeerError::InactivityTimeout)?
            .ok_or_else(|| {
                PeerError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                ))
            })??;

        if peer_handshake.prot.as_slice() != PROTOCOL_STRING.as_bytes() {
            return Err(PeerError::InvalidProtocol);
        }
        if peer_handshake.info_hash != self.info_hash {
            return Err(PeerError::InvalidInfoHash);
        }
        if let Some(expected_id) = self.peer_id {
            if peer_handshake.peer_id != expected_id {
                log::warn!(
                    "peer {} handshake id doesn't match the tracker-reported id",
                    self.addr
                );
            }
        }
        self.peer_id = Some(peer_handshake.peer_id);
        self.state = State::HandshakeAcked;

        // switch from the handshake codec to the message codec, carrying
        // over whatever bytes are already buffered (a peer may pipeline its
        // bitfield right after the handshake).
        let old_parts = hs_framed.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let framed = Framed::from_parts(new_parts);

        let _ = self
            .events
            .send((self.addr, SwarmEvent::Connected { peer_id: self.peer_id }));
        self.state = State::Active;

        let (mut sink, mut stream) = framed.split();
        sink.send(Message::BitField(self.controller.have_snapshot()))
            .await?;

        self.message_loop(&mut sink, &mut stream).await
    }

    async fn message_loop(&mut self, sink: &mut MessageSink, stream: &mut MessageStream) -> Result<(), PeerError> {
        let mut thruput_tick = tokio::time::interval(THRUPUT_TICK_INTERVAL);
        loop {
            tokio::select! {
                frame = tokio::time::timeout(self.conf.read_timeout, stream.next()) => {
                    let frame = frame.map_err(|_| PeerError::InactivityTimeout)?;
                    match frame {
                        Some(Ok(msg)) => {
                            if let Message::Block { data, .. } = &msg {
                                self.counters.down.add_payload(data.len() as u64);
                            }
                            self.handle_message(msg, sink).await?;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd, sink).await? {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                _ = thruput_tick.tick() => {
                    self.counters.tick();
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message, sink: &mut MessageSink) -> Result<(), PeerError> {
        let is_keep_alive = matches!(msg, Message::KeepAlive);

        match msg {
            Message::KeepAlive => {}

            Message::BitField(bitfield) => {
                if self.status.received_non_handshake {
                    return Err(PeerError::BitfieldNotAfterHandshake);
                }
                let expected_bytes = (self.controller.descriptor.piece_count() + 7) / 8;
                if bitfield.len() / 8 != expected_bytes {
                    return Err(PeerError::InvalidBitfieldLength);
                }
                self.has = bitfield;
                self.report_availability();
            }

            Message::Choke => {
                self.status.peer_choking = true;
            }

            Message::Unchoke => {
                self.status.peer_choking = false;
                let _ = self.events.send((self.addr, SwarmEvent::Available));
            }

            Message::Interested => {
                self.status.peer_interested = true;
                let _ = self.events.send((self.addr, SwarmEvent::Interested));
            }

            Message::NotInterested => {
                self.status.peer_interested = false;
                let _ = self.events.send((self.addr, SwarmEvent::NotInterested));
            }

            Message::Have { piece_index } => {
                if piece_index >= self.controller.descriptor.piece_count() {
                    return Err(PeerError::InvalidPieceIndex);
                }
                self.has.set(piece_index, true);
                self.report_availability();
            }

            Message::Request(info) => {
                self.handle_request(info, sink).await?;
            }

            Message::Block { piece_index, offset, data } => {
                self.handle_block(piece_index, offset, &data, sink).await?;
            }

            Message::Cancel(info) => {
                if info.piece_index >= self.controller.descriptor.piece_count() {
                    return Err(PeerError::InvalidPieceIndex);
                }
                // the request pipeline is small enough that a targeted
                // cancel isn't worth tracking; the reply, if already
                // in flight, simply arrives unused.
            }

            Message::Port { .. } => {}
        }

        if !is_keep_alive {
            self.status.received_non_handshake = true;
        }

        Ok(())
    }

    async fn handle_request(&mut self, info: BlockInfo, sink: &mut MessageSink) -> Result<(), PeerError> {
        if self.status.am_choking || !self.status.peer_interested {
            return Ok(());
        }
        if info.piece_index >= self.controller.descriptor.piece_count() {
            return Ok(());
        }
        if !self.controller.has_piece(info.piece_index) {
            return Ok(());
        }
        let piece_len = self.controller.descriptor.piece_len(info.piece_index);
        if info.offset.checked_add(info.len).map_or(true, |end| end > piece_len) {
            return Ok(());
        }

        let piece = match self.controller.read_piece(info.piece_index).await {
            Ok(piece) => piece,
            Err(e) => {
                log::warn!("failed to read piece {} for {}: {e}", info.piece_index, self.addr);
                return Ok(());
            }
        };
        let start = info.offset as usize;
        let end = start + info.len as usize;
        let data = piece[start..end].to_vec();
        self.counters.up.add_payload(data.len() as u64);

        sink.send(Message::Block {
            piece_index: info.piece_index,
            offset: info.offset,
            data: data.into(),
        })
        .await?;
        Ok(())
    }

    async fn handle_block(
        &mut self,
        piece_index: PieceIndex,
        offset: u32,
        data: &[u8],
        sink: &mut MessageSink,
    ) -> Result<(), PeerError> {
        let outcome = {
            let Some((assembling_index, assembler)) = self.assembly.as_mut() else {
                return Ok(());
            };
            if *assembling_index != piece_index {
                return Ok(());
            }
            assembler.add_block(offset, data)
        };

        match outcome {
            BlockOutcome::Pending => {}
            BlockOutcome::Rejected(BlockRejection::Duplicate) => {}
            BlockOutcome::Rejected(_) => {
                let block_index = (offset / BLOCK_LEN) as usize;
                self.request_block(piece_index, block_index, sink).await?;
            }
            BlockOutcome::HashMismatch => {
                self.request_all_blocks(piece_index, sink).await?;
            }
            BlockOutcome::Completed(data) => {
                self.assembly = None;
                let _ = self
                    .events
                    .send((self.addr, SwarmEvent::PieceDownloaded { index: piece_index, data }));
                let _ = self.events.send((self.addr, SwarmEvent::Available));
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: SessionCommand, sink: &mut MessageSink) -> Result<bool, PeerError> {
        match cmd {
            SessionCommand::SetChoking(choke) => {
                if self.status.am_choking != choke {
                    self.status.am_choking = choke;
                    sink.send(if choke { Message::Choke } else { Message::Unchoke }).await?;
                }
            }
            SessionCommand::SetInterested(interested) => {
                if self.status.am_interested != interested {
                    self.status.am_interested = interested;
                    sink.send(if interested {
                        Message::Interested
                    } else {
                        Message::NotInterested
                    })
                    .await?;
                }
            }
            SessionCommand::SchedulePieceDownload(index) => {
                self.schedule_piece_download(index, sink).await?;
            }
            SessionCommand::AnnounceHave(index) => {
                sink.send(Message::Have { piece_index: index }).await?;
            }
            SessionCommand::CancelPiece(index) => {
                if matches!(&self.assembly, Some((i, _)) if *i == index) {
                    self.assembly = None;
                }
            }
            SessionCommand::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    async fn schedule_piece_download(&mut self, index: PieceIndex, sink: &mut MessageSink) -> Result<(), PeerError> {
        debug_assert!(self.assembly.is_none(), "at most one piece in flight per session");
        let piece_len = self.controller.descriptor.piece_len(index);
        let hash = self.controller.descriptor.piece_hash(index);
        self.assembly = Some((index, PieceAssembler::new(piece_len, hash)));
        // let the coordinator pipeline further work onto this session.
        let _ = self.events.send((self.addr, SwarmEvent::Available));
        self.request_all_blocks(index, sink).await
    }

    async fn request_all_blocks(&mut self, index: PieceIndex, sink: &mut MessageSink) -> Result<(), PeerError> {
        let piece_len = self.controller.descriptor.piece_len(index);
        for block_index in 0..block_count(piece_len) {
            self.request_block(index, block_index, sink).await?;
        }
        Ok(())
    }

    async fn request_block(&mut self, index: PieceIndex, block_index: usize, sink: &mut MessageSink) -> Result<(), PeerError> {
        let piece_len = self.controller.descriptor.piece_len(index);
        let offset = block_index as u32 * BLOCK_LEN;
        let len = block_len(piece_len, block_index);
        sink.send(Message::Request(BlockInfo {
            piece_index: index,
            offset,
            len,
        }))
        .await?;
        Ok(())
    }

    fn report_availability(&self) {
        let _ = self
            .events
            .send((self.addr, SwarmEvent::HasUpdated { has: self.has.clone() }));
    }
}
