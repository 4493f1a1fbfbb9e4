//! Error type for `cadence-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] cadence_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type of the closures run on the connection thread.
pub(crate) type CallResult<T> = std::result::Result<T, tokio_rusqlite::Error>;

/// Abort a connection closure with a typed error. The transaction in flight is
/// dropped, which rolls it back, and the error is recovered by
/// `From<tokio_rusqlite::Error>` once the call returns.
pub(crate) fn abort<E>(err: E) -> tokio_rusqlite::Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  tokio_rusqlite::Error::Other(Box::new(err))
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    let boxed = match e {
      tokio_rusqlite::Error::Other(boxed) => boxed,
      other => return Self::Database(other),
    };
    let boxed = match boxed.downcast::<Error>() {
      Ok(ours) => return *ours,
      Err(boxed) => boxed,
    };
    match boxed.downcast::<cadence_core::Error>() {
      Ok(core) => Self::Core(*core),
      Err(boxed) => Self::Database(tokio_rusqlite::Error::Other(boxed)),
    }
  }
}

/// Domain errors pass through unchanged; everything else is a storage
/// failure.
impl From<Error> for cadence_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => cadence_core::Error::Storage(Box::new(other)),
    }
  }
}
