//! Accepts inbound TCP connections for a torrent and hands each one to the
//! [`crate::torrent::swarm::SwarmCoordinator`] as an inbound
//! [`PeerSession`].

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;

use crate::{
    conf::TorrentConf,
    error::torrent::TorrentError,
    event::{EventSender, RegisterSender, ShutdownReceiver},
    peer::session::PeerSession,
    torrent::controller::TorrentController,
    PeerId, Sha1Hash,
};

pub struct ServerAcceptor {
    listener: TcpListener,
    info_hash: Sha1Hash,
    client_id: PeerId,
    controller: Arc<TorrentController>,
    conf: TorrentConf,
    events: EventSender,
    register: RegisterSender,
    shutdown_rx: ShutdownReceiver,
}

impl ServerAcceptor {
    /// Binds the listening socket. Binding is the only fallible part of
    /// accepting connections; once bound, a per-connection failure never
    /// brings the acceptor down.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind(
        addr: SocketAddr,
        info_hash: Sha1Hash,
        client_id: PeerId,
        controller: Arc<TorrentController>,
        conf: TorrentConf,
        events: EventSender,
        register: RegisterSender,
        shutdown_rx: ShutdownReceiver,
    ) -> Result<Self, TorrentError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            info_hash,
            client_id,
            controller,
            conf,
            events,
            register,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the coordinator's register channel is gone
    /// or the engine asks the torrent to shut down.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => self.spawn_inbound(socket, addr),
                        Err(e) => log::warn!("failed to accept inbound peer connection: {e}"),
                    }
                }
                _ = self.shutdown_rx.changed() => break,
            }
            if self.register.is_closed() {
                break;
            }
        }
    }

    fn spawn_inbound(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let (session, cmd_tx) = PeerSession::inbound(
            addr,
            self.info_hash,
            self.client_id,
            self.controller.clone(),
            self.conf.clone(),
            self.events.clone(),
        );
        if self.register.send((addr, cmd_tx)).is_err() {
            log::warn!("swarm coordinator gone, dropping inbound connection from {addr}");
            return;
        }
        tokio::spawn(session.start_inbound(socket));
    }
}
