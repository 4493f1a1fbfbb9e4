//! Error types for `cadence-core`.
//!
//! The variants mirror how callers are expected to react: a request is
//! malformed, the actor lacks access, something is absent, version ordering
//! is violated, or an infrastructure dependency is briefly unavailable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Bad time ranges, missing recurrence, interval not exceeding duration,
  /// unknown share targets, updates rejected by the occurrence state machine.
  #[error("validation failed: {0}")]
  Validation(String),

  /// Insufficient access level, self-share, or self-removal.
  #[error("not authorized: {0}")]
  Authorization(String),

  /// Event, version, grant, or occurrence absent.
  #[error("not found: {0}")]
  NotFound(String),

  /// Rollback or diff version ordering violated.
  #[error("conflict: {0}")]
  Conflict(String),

  /// The time queue or signal bus could not be reached.
  #[error("transient infrastructure error: {0}")]
  TransientInfra(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The persistent store failed for a reason outside the domain taxonomy.
  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A stored change-log value could not be decoded through the field
  /// registry.
  #[error("corrupt value for field {field}: {value:?}")]
  Corrupt { field: String, value: String },
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

  pub fn unauthorized(msg: impl Into<String>) -> Self {
    Self::Authorization(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }

  pub fn conflict(msg: impl Into<String>) -> Self { Self::Conflict(msg.into()) }

  pub fn transient<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::TransientInfra(Box::new(err))
  }
}

impl From<std::convert::Infallible> for Error {
  fn from(e: std::convert::Infallible) -> Self { match e {} }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
