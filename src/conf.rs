//! This module defines types used to configure the engine and its parts.

use std::{path::PathBuf, time::Duration};

use crate::PeerId;

pub const CLIENT_ID: &PeerId = b"cbt-0000000000000000";

/// The global configuration for the torrent engine and all its parts.
#[derive(Debug, Clone)]
pub struct Conf {
  pub engine: EngineConf,
  pub torrent: TorrentConf,
}

impl Conf {
  /// Returns a configuration with reasonable defaults for everything except
  /// the download directory, as it is not sensible to guess that for the
  /// user. It uses the default client id [`CLIENT_ID`].
  pub fn new(download_dir: impl Into<PathBuf>) -> Self {
    Self {
      engine: EngineConf {
        client_id: *CLIENT_ID,
        download_dir: download_dir.into(),
        listen_port: 6881,
      },
      torrent: TorrentConf::default(),
    }
  }
}

/// Configuration related to the engine itself, shared by all torrents.
#[derive(Debug, Clone)]
pub struct EngineConf {
  /// The ID of the client to announce to trackers and other peers.
  pub client_id: PeerId,
  /// The directory in which a torrent's files are placed upon download and
  /// from which they are seeded.
  pub download_dir: PathBuf,
  /// The port on which [`crate::torrent::acceptor::ServerAcceptor`] listens
  /// for inbound peer connections.
  pub listen_port: u16,
}

/// Configuration for a torrent's [`crate::torrent::swarm::SwarmCoordinator`].
///
/// The engine will have a default instance of this applied to all torrents
/// by default, but individual torrents may override this configuration.
#[derive(Debug, Clone)]
pub struct TorrentConf {
  /// The max number of simultaneous outbound connection attempts.
  pub max_active_connections: usize,

  /// The max number of peers we request blocks from at once.
  pub max_downloading_from: usize,

  /// The max number of peers we unchoke (upload to) at once.
  pub max_uploading_to: usize,

  /// The fixed block length used for all requests. Always 16 KiB; kept as a
  /// field rather than a bare constant so sessions and the assembler agree
  /// on a single source.
  pub block_length: u32,

  /// Time to wait for a TCP connect to succeed before treating it as a
  /// failed peer.
  pub connect_timeout: Duration,

  /// Inactivity read timeout for an established session.
  pub read_timeout: Duration,

  /// Time given to a session to shut down gracefully before it is dropped.
  pub close_timeout: Duration,

  /// If the tracker doesn't provide a minimum announce interval, we default
  /// to announcing at this cadence. Purely advisory: the tracker client
  /// itself is outside this crate.
  pub announce_interval: Duration,

  /// After this many attempts, the torrent stops announcing to a tracker.
  pub tracker_error_threshold: usize,

  /// The level at which the embedding binary's logger should be
  /// initialized. The engine never installs a logger itself; it only calls
  /// into `log`'s facade.
  pub log_level: LogLevel,
}

/// Logging verbosity recognized by the configuration, consumed by the
/// embedding binary's logger initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
  Debug,
  Info,
  Warn,
}

impl Default for TorrentConf {
  fn default() -> Self {
    TorrentConf {
      max_active_connections: 30,
      max_downloading_from: 20,
      max_uploading_to: 20,
      block_length: crate::BLOCK_LEN,
      connect_timeout: Duration::from_secs(15),
      read_timeout: Duration::from_secs(120),
      close_timeout: Duration::from_secs(15),
      announce_interval: Duration::from_secs(60 * 60),
      tracker_error_threshold: 15,
      log_level: LogLevel::Info,
    }
  }
}
