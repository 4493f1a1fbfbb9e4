//! The `EventStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `cadence-store-sqlite`).
//! `cadence-engine` depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  access::{AccessGrant, AccessLevel, ShareTarget},
  event::{EventId, EventRecord, EventUpdate, NewEvent, Occurrence, OccurrenceStatus},
  history::{ChangeLogEntry, Diff},
  tracker::FieldChange,
  user::{User, UserId},
};

// ─── Query type ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSort {
  #[default]
  StartTime,
  Title,
  Status,
}

/// Parameters for [`EventStore::list_events`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
  /// Substring matched against title and location.
  pub text:       Option<String>,
  /// Status of the current occurrence.
  pub status:     Option<OccurrenceStatus>,
  /// Exact access level the actor holds.
  pub level:      Option<AccessLevel>,
  #[serde(default)]
  pub sort:       EventSort,
  #[serde(default)]
  pub descending: bool,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

/// A row of [`EventStore::list_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
  pub record: EventRecord,
  pub level:  AccessLevel,
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of an update. `changes` is empty and `version` unchanged for a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
  pub changes: Vec<FieldChange>,
  pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
  pub version:  i64,
  /// The diff over `(version, previous version]`: each field's `old` is the
  /// value now restored, `new` the value it replaced.
  pub restored:  Diff,
  /// Change-log rows discarded by the rollback.
  pub discarded: usize,
}

/// A start transition: the occurrence now active, and the next one in the
/// series if the event recurs and it was not already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
  pub occurrence: Occurrence,
  pub next:       Option<Occurrence>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Cadence event store backend.
///
/// Every method that writes more than one row does so in one transaction.
/// Domain failures are reported through `Self::Error`, which converts into
/// [`crate::Error`] with its taxonomy intact.
pub trait EventStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  fn add_user(
    &self,
    email: String,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Users matching `ids`. Unknown ids are skipped.
  fn get_users(
    &self,
    ids: Vec<UserId>,
  ) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;

  // ── Events ────────────────────────────────────────────────────────────

  /// Create info, first occurrence, optional rule, and the owner grant as one
  /// unit. The input is expected to be validated and normalised.
  fn create_event(
    &self,
    input: NewEvent,
    owner: UserId,
  ) -> impl Future<Output = Result<EventRecord, Self::Error>> + Send + '_;

  /// Create several events in one transaction; either all persist or none.
  fn create_events(
    &self,
    inputs: Vec<NewEvent>,
    owner: UserId,
  ) -> impl Future<Output = Result<Vec<EventRecord>, Self::Error>> + Send + '_;

  /// The event with its current occurrence. `None` if it does not exist.
  fn get_event(
    &self,
    event_id: EventId,
  ) -> impl Future<Output = Result<Option<EventRecord>, Self::Error>> + Send + '_;

  /// Apply a partial update through the change tracker and persist the new
  /// state with its change-log batch atomically.
  fn update_event(
    &self,
    event_id: EventId,
    update: EventUpdate,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + '_;

  /// Delete the event and everything that references it.
  fn delete_event(
    &self,
    event_id: EventId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_events<'a>(
    &'a self,
    user_id: UserId,
    query: &'a EventQuery,
  ) -> impl Future<Output = Result<Vec<EventSummary>, Self::Error>> + Send + 'a;

  // ── History ───────────────────────────────────────────────────────────

  /// Change-log entries with `version > after_version`, ordered by version
  /// then insertion.
  fn change_log(
    &self,
    event_id: EventId,
    after_version: i64,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + '_;

  /// Restore the live state to `target`, discard newer change-log rows, and
  /// set the version to `target`.
  fn rollback(
    &self,
    event_id: EventId,
    target: i64,
  ) -> impl Future<Output = Result<RollbackOutcome, Self::Error>> + Send + '_;

  // ── Access ────────────────────────────────────────────────────────────

  fn get_grant(
    &self,
    event_id: EventId,
    user_id: UserId,
  ) -> impl Future<Output = Result<Option<AccessGrant>, Self::Error>> + Send + '_;

  fn list_grants(
    &self,
    event_id: EventId,
  ) -> impl Future<Output = Result<Vec<AccessGrant>, Self::Error>> + Send + '_;

  /// Upsert grants for every target. Fails as a whole if any target user is
  /// unknown or the request breaks a sharing rule.
  fn share(
    &self,
    event_id: EventId,
    actor: UserId,
    targets: Vec<ShareTarget>,
  ) -> impl Future<Output = Result<Vec<AccessGrant>, Self::Error>> + Send + '_;

  fn remove_grant(
    &self,
    event_id: EventId,
    actor: UserId,
    user_id: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Occurrences ───────────────────────────────────────────────────────

  fn list_occurrences(
    &self,
    event_id: EventId,
  ) -> impl Future<Output = Result<Vec<Occurrence>, Self::Error>> + Send + '_;

  /// Scheduled occurrences starting in `[from, to]` and active occurrences
  /// ending in `[from, to]`.
  fn occurrences_in_window(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Occurrence>, Self::Error>> + Send + '_;

  /// Activate the earliest scheduled occurrence starting at or before
  /// `as_of`, inserting the next occurrence of a recurring series in the same
  /// transaction. `None` when nothing is due.
  fn activate_due(
    &self,
    event_id: EventId,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Activation>, Self::Error>> + Send + '_;

  /// Complete the earliest active occurrence ending at or before `as_of`.
  fn complete_due(
    &self,
    event_id: EventId,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Occurrence>, Self::Error>> + Send + '_;

  /// Cancel the current occurrence.
  fn cancel_current(
    &self,
    event_id: EventId,
  ) -> impl Future<Output = Result<Occurrence, Self::Error>> + Send + '_;
}
