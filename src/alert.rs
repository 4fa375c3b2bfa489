//! This module defines the alerts the API user may receive from torrent engine.
//!
//! Communication of such alerts is performed via unbounded [tokio::mpsc::channel].
//! Thus, the application should in which the engine is integrated may be driven
//! particular or entirely by this crate alerts.
//!
//! # Optional information
//!
//! By default, only the most basic alerts are broadcast from the engine.
//! The reason for this is that the crate follows a philosophy similar lies
//! behind Rust or Cpp.
//!
//! This is of course not fully possible with something as complex as a torrent
//! engine, but an effort is made to make more expensive operations optional.
//!
//! Such alerts include the
//! - [latest downloaded pieces]
//! - [peers]

use std::{path::PathBuf, time::Duration};

use crate::{error::Error, TorrentId};

/// The channel on which the engine posts alerts and the embedding
/// application receives them.
pub type AlertSender = tokio::sync::mpsc::UnboundedSender<Alert>;
pub type AlertReceiver = tokio::sync::mpsc::UnboundedReceiver<Alert>;

#[derive(Debug)]
pub enum Alert {
    /// Emitted after every completed piece: overall progress, a download
    /// rate rolled over the last 100 completed pieces, and an ETA derived
    /// from that rate (`None` until the rate is known to be nonzero).
    Progress {
        id: TorrentId,
        percent: f64,
        rate_bytes_per_sec: u64,
        eta: Option<Duration>,
    },

    /// Every piece has been verified and written to storage. The torrent
    /// keeps seeding afterwards; this fires exactly once per torrent.
    TorrentComplete {
        id: TorrentId,
        elapsed: Duration,
        output_path: PathBuf,
    },

    Error(Error),
}
