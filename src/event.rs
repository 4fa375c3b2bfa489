//! A small typed publish/subscribe mechanism between [`crate::peer::session`]
//! and [`crate::torrent::swarm`].
//!
//! Rather than a free-form string-keyed event bus, the set of events a
//! session may raise is a closed enumeration ([`SwarmEvent`]), sent over a
//! plain [`tokio::sync::mpsc`] channel to the coordinator. This sidesteps the
//! peer↔coordinator ownership cycle: the session only ever holds a `Sender`,
//! never a reference back into the coordinator's tables.

use std::net::SocketAddr;

use crate::{error::peer::PeerError, Bitfield, PeerId, PieceIndex};

/// The channel on which [`crate::torrent::swarm::SwarmCoordinator`] receives
/// notifications from every live [`crate::peer::session::PeerSession`].
pub type EventSender = tokio::sync::mpsc::UnboundedSender<(SocketAddr, SwarmEvent)>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<(SocketAddr, SwarmEvent)>;

/// Events a peer session may raise, tagged with the originating address by
/// the channel tuple rather than carried in the variant itself.
#[derive(Debug)]
pub enum SwarmEvent {
    /// The outbound/inbound connection was established and the handshake
    /// exchanged successfully.
    Connected { peer_id: Option<PeerId> },

    /// The session died, for any reason (transport, protocol, integrity,
    /// timeout). The connection is already closed by the time this fires.
    Panic { reason: PeerError },

    /// The session became able to make more requests: it was just unchoked,
    /// or one of its in-flight piece downloads just finished (successfully
    /// or not).
    Available,

    /// The peer announced interest in downloading from us.
    Interested,

    /// The peer is no longer interested in downloading from us.
    NotInterested,

    /// The peer's known piece availability changed, via a `Bitfield` or a
    /// `Have`. Carries the full current snapshot rather than a delta so the
    /// coordinator never has to reconstruct it.
    HasUpdated { has: Bitfield },

    /// A piece was fully assembled and its hash verified.
    PieceDownloaded { index: PieceIndex, data: Vec<u8> },
}

/// The channel on which [`crate::torrent::swarm::SwarmCoordinator`] sends
/// commands to a single [`crate::peer::session::PeerSession`].
pub type CommandSender = tokio::sync::mpsc::UnboundedSender<SessionCommand>;
pub type CommandReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionCommand>;

/// Commands the coordinator may issue to one of its sessions.
#[derive(Debug)]
pub enum SessionCommand {
    /// Set whether we are choking this peer's requests.
    SetChoking(bool),
    /// Set whether we are interested in this peer's pieces.
    SetInterested(bool),
    /// Begin (or continue) downloading the given piece on this session.
    SchedulePieceDownload(PieceIndex),
    /// Announce that a piece (possibly downloaded via another session) is
    /// now available, so this session can advertise it with `Have`.
    AnnounceHave(PieceIndex),
    /// Cancel an in-flight request for the given piece, used to cancel
    /// end-game losers.
    CancelPiece(PieceIndex),
    /// Close the connection and end the session's task.
    Shutdown,
}

/// The channel on which [`crate::torrent::acceptor::ServerAcceptor`] hands a
/// freshly accepted inbound session's command sender to the coordinator,
/// before that session's `Connected` event arrives. Outbound sessions don't
/// need this: the coordinator creates their command channel itself, in
/// [`crate::peer::session::PeerSession::outbound`].
pub type RegisterSender = tokio::sync::mpsc::UnboundedSender<(SocketAddr, CommandSender)>;
pub type RegisterReceiver = tokio::sync::mpsc::UnboundedReceiver<(SocketAddr, CommandSender)>;

/// Broadcasts a torrent-wide shutdown to its [`crate::torrent::swarm::SwarmCoordinator`]
/// and [`crate::torrent::acceptor::ServerAcceptor`] at once. A `watch` channel rather
/// than a `oneshot` because both tasks need their own receiver.
pub type ShutdownSender = tokio::sync::watch::Sender<bool>;
pub type ShutdownReceiver = tokio::sync::watch::Receiver<bool>;
