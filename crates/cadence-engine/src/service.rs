//! [`EventService`]: every client-facing operation, behind the access guard.
//!
//! The service resolves the actor's grant, checks it against the action, and
//! delegates to the store. Pure history work (diff folding, reconstruction)
//! runs here over change-log entries read from the store.

use std::sync::Arc;

use cadence_core::{
  Error, Result,
  access::{self, AccessGrant, AccessLevel, Action, ShareTarget},
  event::{EventId, EventRecord, EventState, EventUpdate, NewEvent, Occurrence},
  history::{self, Diff, VersionChanges},
  signal::{Signal, SignalBus, Topic},
  store::{EventQuery, EventStore, EventSummary, RollbackOutcome, UpdateOutcome},
  user::UserId,
};
use chrono::Utc;
use tracing::{info, warn};

pub struct EventService<S, B> {
  store: Arc<S>,
  bus:   Arc<B>,
}

impl<S, B> EventService<S, B>
where
  S: EventStore,
  B: SignalBus,
{
  pub fn new(store: Arc<S>, bus: Arc<B>) -> Self { Self { store, bus } }

  /// Check `actor`'s grant on `event_id` against `action`. A missing event is
  /// reported as not found rather than unauthorized.
  async fn authorize(&self, event_id: EventId, actor: UserId, action: Action) -> Result<AccessLevel> {
    let grant = self.store.get_grant(event_id, actor).await.map_err(Into::<Error>::into)?;
    if grant.is_none() && self.store.get_event(event_id).await.map_err(Into::<Error>::into)?.is_none() {
      return Err(Error::not_found(format!("event {event_id}")));
    }
    access::authorize(grant.as_ref(), action)
  }

  async fn require_event(&self, event_id: EventId) -> Result<EventRecord> {
    self
      .store
      .get_event(event_id)
      .await
      .map_err(Into::<Error>::into)?
      .ok_or_else(|| Error::not_found(format!("event {event_id}")))
  }

  // ── Creation ──────────────────────────────────────────────────────────────

  /// Create an event owned by `actor`.
  pub async fn create_event(&self, input: NewEvent, actor: UserId) -> Result<EventRecord> {
    let input = input.normalized();
    input.validate(Utc::now())?;
    let record = self.store.create_event(input, actor).await.map_err(Into::<Error>::into)?;
    info!(event_id = record.info.event_id, owner = actor, "event created");
    Ok(record)
  }

  /// Create several events; every payload is validated before any is written.
  pub async fn create_events(&self, inputs: Vec<NewEvent>, actor: UserId) -> Result<Vec<EventRecord>> {
    let now = Utc::now();
    let inputs: Vec<NewEvent> = inputs.into_iter().map(NewEvent::normalized).collect();
    for (i, input) in inputs.iter().enumerate() {
      input.validate(now).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(format!("event #{i}: {msg}")),
        other => other,
      })?;
    }
    let records = self.store.create_events(inputs, actor).await.map_err(Into::<Error>::into)?;
    info!(count = records.len(), owner = actor, "events created");
    Ok(records)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_event(&self, event_id: EventId, actor: UserId) -> Result<EventRecord> {
    self.authorize(event_id, actor, Action::Read).await?;
    self.require_event(event_id).await
  }

  pub async fn list_events(&self, actor: UserId, query: &EventQuery) -> Result<Vec<EventSummary>> {
    self.store.list_events(actor, query).await.map_err(Into::<Error>::into)
  }

  /// Every version bump, ascending. Empty for an event never updated.
  pub async fn changelog(&self, event_id: EventId, actor: UserId) -> Result<Vec<VersionChanges>> {
    self.authorize(event_id, actor, Action::Changelog).await?;
    let entries = self.store.change_log(event_id, 0).await.map_err(Into::<Error>::into)?;
    Ok(history::changelog(&entries))
  }

  /// Per-field `[old, new]` between versions `v1 < v2`.
  pub async fn diff(&self, event_id: EventId, actor: UserId, v1: i64, v2: i64) -> Result<Diff> {
    self.authorize(event_id, actor, Action::Diff).await?;
    if v1 >= v2 {
      return Err(Error::conflict(format!("diff requires v1 < v2, got {v1} >= {v2}")));
    }
    let current = self.require_event(event_id).await?.info.version;
    if v1 < 1 || v2 > current {
      return Err(Error::not_found(format!(
        "versions {v1}..{v2} of event {event_id} (current version is {current})"
      )));
    }
    let entries = self.store.change_log(event_id, v1).await.map_err(Into::<Error>::into)?;
    history::diff_range(&entries, v1, v2)
  }

  /// The event as it was at `version`.
  pub async fn history(&self, event_id: EventId, actor: UserId, version: i64) -> Result<EventState> {
    self.authorize(event_id, actor, Action::History).await?;
    let record = self.require_event(event_id).await?;
    let entries = self
      .store
      .change_log(event_id, version.max(0))
      .await
      .map_err(Into::<Error>::into)?;
    history::reconstruct(&record.state(), record.occurrence.occurrence_id, &entries, version)
  }

  pub async fn list_permissions(&self, event_id: EventId, actor: UserId) -> Result<Vec<AccessGrant>> {
    self.authorize(event_id, actor, Action::ListPermissions).await?;
    self.store.list_grants(event_id).await.map_err(Into::<Error>::into)
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// Apply a partial update. When at least one field changed, a `send_notif`
  /// signal is published; failing to publish it does not fail the update.
  pub async fn update_event(
    &self,
    event_id: EventId,
    actor: UserId,
    update: EventUpdate,
  ) -> Result<UpdateOutcome> {
    self.authorize(event_id, actor, Action::Update).await?;
    let outcome = self.store.update_event(event_id, update).await.map_err(Into::<Error>::into)?;

    if !outcome.changes.is_empty() {
      info!(event_id, version = outcome.version, changes = outcome.changes.len(), "event updated");
      let signal = Signal::new(event_id, Topic::SendNotif, Utc::now());
      if let Err(e) = self.bus.publish(signal).await {
        warn!(event_id, error = %e, "failed to publish update notification");
      }
    }
    Ok(outcome)
  }

  /// Destructively restore the event to `target` and discard newer history.
  pub async fn rollback(&self, event_id: EventId, actor: UserId, target: i64) -> Result<RollbackOutcome> {
    self.authorize(event_id, actor, Action::Rollback).await?;
    let outcome = self.store.rollback(event_id, target).await.map_err(Into::<Error>::into)?;
    info!(event_id, version = outcome.version, "event rolled back");
    Ok(outcome)
  }

  pub async fn cancel_event(&self, event_id: EventId, actor: UserId) -> Result<Occurrence> {
    self.authorize(event_id, actor, Action::Cancel).await?;
    let occurrence = self.store.cancel_current(event_id).await.map_err(Into::<Error>::into)?;
    info!(event_id, occurrence_id = occurrence.occurrence_id, "occurrence cancelled");
    Ok(occurrence)
  }

  pub async fn delete_event(&self, event_id: EventId, actor: UserId) -> Result<()> {
    self.authorize(event_id, actor, Action::Delete).await?;
    self.store.delete_event(event_id).await.map_err(Into::<Error>::into)?;
    info!(event_id, "event deleted");
    Ok(())
  }

  /// Grant or change access for every target. All-or-nothing.
  pub async fn share(
    &self,
    event_id: EventId,
    actor: UserId,
    targets: Vec<ShareTarget>,
  ) -> Result<Vec<AccessGrant>> {
    self.authorize(event_id, actor, Action::Share).await?;
    let grants = self.store.share(event_id, actor, targets).await.map_err(Into::<Error>::into)?;
    info!(event_id, grants = grants.len(), "event shared");
    Ok(grants)
  }

  pub async fn remove_permission(&self, event_id: EventId, actor: UserId, user_id: UserId) -> Result<()> {
    self.authorize(event_id, actor, Action::RemovePermission).await?;
    self.store.remove_grant(event_id, actor, user_id).await.map_err(Into::<Error>::into)?;
    info!(event_id, user_id, "access removed");
    Ok(())
  }
}
