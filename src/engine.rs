//! The engine is the top-level coordinator that runs and manages all
//! torrents. The user interacts with the engine via the [`EngineHandle`],
//! which exposes a restricted public API. The underlying communication
//! method is a [tokio mpsc channel].
//!
//! The engine is spawned as a [tokio task] and runs in the background.
//! As with spawning other tokio tasks, it must be done within the context
//! of a tokio executor.
//!
//! The engine is run until an unrecoverable error occurs, or until the
//! user sends a shutdown command. Unlike a single torrent's failure, which
//! is reported via [`crate::alert::Alert::Error`] and does not affect other
//! torrents, only [`Command::Shutdown`] or a panic in the engine task
//! itself stops the engine.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task,
};

use crate::{
    alert::{Alert, AlertReceiver, AlertSender},
    conf::{Conf, TorrentConf},
    error::{disk::StorageError, torrent::TorrentError, EngineResult, Error},
    event::ShutdownSender,
    metainfo::Metainfo,
    storage::{FileStorage, Storage},
    torrent::{
        acceptor::ServerAcceptor,
        controller::TorrentController,
        descriptor::TorrentDescriptor,
        swarm::{PeerRecord, SwarmCoordinator},
    },
    TorrentId,
};

/// The channel through which the user can send commands to the engine.
pub type Sender = UnboundedSender<Command>;
/// The channel on which the engine listens for commands from the user.
type Receiver = UnboundedReceiver<Command>;

/// The type of commands that the engine can receive.
pub enum Command {
    /// Contains the information for creating a new torrent.
    CreateTorrent {
        id: TorrentId,
        params: Box<TorrentParams>,
    },
    /// Gracefully shuts down the engine and waits for all its torrents to do
    /// the same.
    Shutdown,
}

/// Spawns the engine as a tokio task.
///
/// As with spawning other tokio tasks, it must be done within the context
/// of a tokio executor.
///
/// The return value is a tuple of an [`EngineHandle`], which may be used to
/// send the engine commands, and an [`AlertReceiver`], to which various
/// components in the engine will send alerts of events.
pub fn spawn(conf: Conf) -> EngineResult<(EngineHandle, AlertReceiver)> {
    log::info!("spawning engine task");

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let (mut engine, tx) = Engine::new(conf, alert_tx);

    let join_handle = task::spawn(async move { engine.run().await });

    Ok((
        EngineHandle {
            tx,
            join_handle: Some(join_handle),
        },
        alert_rx,
    ))
}

/// Information for creating a new torrent.
pub struct TorrentParams {
    /// The torrent's metadata, already parsed from its bencoded form.
    pub metainfo: Metainfo,
    /// If set, overrides the default global torrent config.
    pub conf: Option<TorrentConf>,
    /// The initial candidate peers, as decoded by the caller's tracker
    /// client (or, for single-peer debug sessions, a one-element list built
    /// by hand). May be empty for a torrent that only accepts inbound
    /// connections.
    pub peers: Vec<PeerRecord>,
    /// The address on which the torrent should listen for new peers. If
    /// unset, listens on the engine's configured port on all interfaces.
    pub listen_addr: Option<SocketAddr>,
}

struct Engine {
    /// All currently running torrents in the engine.
    torrents: HashMap<TorrentId, TorrentEntry>,

    /// The port on which the API consumer sends the engine commands.
    cmd_rx: Receiver,

    /// The channel on which tasks in the engine post alerts to the user.
    alert_tx: AlertSender,

    /// The global engine configuration that includes defaults for torrents
    /// whose config is not overridden.
    conf: Conf,
}

/// A running torrent's entry in the engine.
struct TorrentEntry {
    /// Broadcasts a shutdown to the torrent's coordinator and acceptor.
    shutdown_tx: ShutdownSender,
    /// The swarm coordinator task's join handle, used during shutdown.
    coordinator_handle: task::JoinHandle<()>,
    /// The inbound-connection acceptor task's join handle.
    acceptor_handle: task::JoinHandle<()>,
}

impl Engine {
    fn new(conf: Conf, alert_tx: AlertSender) -> (Self, Sender) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        (
            Engine {
                torrents: HashMap::new(),
                cmd_rx,
                alert_tx,
                conf,
            },
            cmd_tx,
        )
    }

    async fn run(&mut self) {
        log::info!("starting engine");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::CreateTorrent { id, params } => {
                    if let Err(error) = self.create_torrent(id, *params).await {
                        log::error!("failed to create torrent {id}: {error}");
                        let _ = self.alert_tx.send(Alert::Error(Error::Torrent { id, error }));
                    }
                }
                Command::Shutdown => {
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    /// Builds and spawns a new torrent's coordinator and acceptor tasks.
    ///
    /// Whether the torrent starts out downloading or seeding is never
    /// decided here: [`TorrentController::new`] derives the have/want sets
    /// from whatever the storage backend has already persisted, so a
    /// torrent that was fully downloaded in a previous run comes back up as
    /// a seed automatically.
    async fn create_torrent(&mut self, id: TorrentId, params: TorrentParams) -> Result<(), TorrentError> {
        let conf = params.conf.unwrap_or_else(|| self.conf.torrent.clone());
        let descriptor = TorrentDescriptor::from_metainfo(params.metainfo)?;

        let download_dir = self.conf.engine.download_dir.clone();
        let output_path = download_dir.join(&descriptor.name);
        let storage_descriptor = descriptor.clone();
        let storage = task::spawn_blocking(move || FileStorage::new(&storage_descriptor, download_dir))
            .await
            .map_err(|_| StorageError::TaskJoin)??;
        let storage: Arc<dyn Storage> = Arc::new(storage);

        let controller = TorrentController::new(descriptor.clone(), storage).await?;

        let listen_addr = params
            .listen_addr
            .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.conf.engine.listen_port));

        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let (coordinator, events_tx) = SwarmCoordinator::new(
            id,
            controller.clone(),
            self.conf.engine.client_id,
            descriptor.info_hash,
            conf.clone(),
            params.peers,
            register_rx,
            shutdown_rx.clone(),
            self.alert_tx.clone(),
            output_path,
        );

        let acceptor = ServerAcceptor::bind(
            listen_addr,
            descriptor.info_hash,
            self.conf.engine.client_id,
            controller,
            conf,
            events_tx,
            register_tx,
            shutdown_rx,
        )
        .await?;

        log::info!("torrent {id} listening on {}", acceptor.local_addr()?);

        self.torrents.insert(
            id,
            TorrentEntry {
                shutdown_tx,
                coordinator_handle: task::spawn(coordinator.run()),
                acceptor_handle: task::spawn(acceptor.run()),
            },
        );

        Ok(())
    }

    async fn shutdown(&mut self) {
        log::info!("shutting down engine");

        for entry in self.torrents.values() {
            // the torrent's tasks may already be gone, so don't panic here.
            let _ = entry.shutdown_tx.send(true);
        }

        for (id, entry) in self.torrents.drain() {
            if let Err(e) = entry.coordinator_handle.await {
                log::error!("torrent {id} coordinator task panicked: {e}");
            }
            if let Err(e) = entry.acceptor_handle.await {
                log::error!("torrent {id} acceptor task panicked: {e}");
            }
        }
    }
}

/// A handle to the currently running torrent engine.
pub struct EngineHandle {
    tx: Sender,
    join_handle: Option<task::JoinHandle<()>>,
}

impl EngineHandle {
    /// Creates and starts a torrent, if its metainfo describes a supported
    /// (single-file) layout.
    ///
    /// Returns immediately with the id of the torrent; creation itself
    /// happens asynchronously on the engine task, and failures are reported
    /// through the [`AlertReceiver`] rather than this call.
    pub fn create_torrent(&self, params: TorrentParams) -> EngineResult<TorrentId> {
        log::trace!("creating torrent");
        let id = TorrentId::new();
        self.tx.send(Command::CreateTorrent {
            id,
            params: Box::new(params),
        })?;
        Ok(id)
    }

    /// Gracefully shuts down the engine and waits for all its torrents to do
    /// the same.
    ///
    /// # Panics
    ///
    /// This method panics if the engine has already been shut down.
    pub async fn shutdown(mut self) -> EngineResult<()> {
        log::trace!("shutting down engine task");
        self.tx.send(Command::Shutdown)?;
        if let Err(e) = self.join_handle.take().expect("engine already shut down").await {
            log::error!("engine task panicked: {e}");
        }
        Ok(())
    }
}
