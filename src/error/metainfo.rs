pub use serde_bencode::Error as BencodeError;

/// A bencode deserialization failure surfaced from a `serde::de::Deserializer`
/// impl, kept distinct from [`BencodeError`] since it may originate from a
/// generic visitor (e.g. a tracker response field) rather than from
/// `serde_bencode` itself.
#[derive(thiserror::Error, Debug)]
pub enum BencodeDeError {
    #[error("{0}")]
    Message(String),
}

pub(crate) type Result<T> = std::result::Result<T, MetainfoError>;

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
  #[error("{0}")]
  Bencode(BencodeError),

  #[error("Invalid Metainfo")]
  InvalidMetainfo,

  #[error("Invalid Pieces")]
  InvalidPieces,

  #[error("Invalid Tracker Url")]
  InvalidTrackerUrl,
}

impl From<BencodeError> for MetainfoError {
  fn from(error: BencodeError) -> Self {
    Self::Bencode(error)
  }
}

impl From<url::ParseError> for MetainfoError {
  fn from(_: url::ParseError) -> Self {
    Self::InvalidTrackerUrl
  }
}
