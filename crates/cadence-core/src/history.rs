//! Version history: change-log entries, diff folding, reconstruction of past
//! versions, and rollback planning.
//!
//! A diff over `(v1, v2]` folds every change-log entry in that range per
//! field: the first entry touching a field seeds its `old` value, every entry
//! moves its `new` value forward. Folding is telescoping, so
//! `diff(v1, v3) == compose(diff(v1, v2), diff(v2, v3))`. A field changed and
//! then changed back inside the range still appears, with `old == new`.
//!
//! Start and end times belong to one occurrence. Their entries carry that
//! occurrence's id, and reconstruction or rollback only applies the ones
//! written against the event's current occurrence; times of earlier cycles
//! stay with the rows that are already finished.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{
  Error, Result,
  event::{EventId, EventState, OccurrenceId},
  field::{Field, FieldOwner, TypedValue},
  tracker::FieldChange,
};

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One persisted change-log row, decoded through the field registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeLogEntry {
  pub id:            i64,
  pub event_id:      EventId,
  pub version:       i64,
  pub field:         Field,
  pub old:           Option<TypedValue>,
  pub new:           Option<TypedValue>,
  pub changed_at:    DateTime<Utc>,
  /// The occurrence a start or end time change was made on. `None` for
  /// fields owned by the event or its rule.
  pub occurrence_id: Option<OccurrenceId>,
}

impl ChangeLogEntry {
  /// Event and rule fields always apply; times only on their own occurrence.
  fn applies_to(&self, occurrence_id: OccurrenceId) -> bool {
    self.field.owner() != FieldOwner::Occurrence || self.occurrence_id == Some(occurrence_id)
  }
}

/// All changes written in one version bump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChanges {
  pub version: i64,
  pub changes: Vec<FieldChange>,
}

/// Group entries by version, ascending, keeping insertion order within each
/// version.
pub fn changelog(entries: &[ChangeLogEntry]) -> Vec<VersionChanges> {
  let mut out: Vec<VersionChanges> = Vec::new();
  for entry in ordered(entries) {
    let change = FieldChange {
      field: entry.field,
      old:   entry.old.clone(),
      new:   entry.new.clone(),
    };
    match out.last_mut() {
      Some(last) if last.version == entry.version => last.changes.push(change),
      _ => out.push(VersionChanges { version: entry.version, changes: vec![change] }),
    }
  }
  out
}

fn ordered(entries: &[ChangeLogEntry]) -> Vec<&ChangeLogEntry> {
  let mut sorted: Vec<&ChangeLogEntry> = entries.iter().collect();
  sorted.sort_by_key(|e| (e.version, e.id));
  sorted
}

// ─── Diff ────────────────────────────────────────────────────────────────────

/// The net change of one field across a version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
  pub old: Option<TypedValue>,
  pub new: Option<TypedValue>,
}

/// Serialised as a two-element `[old, new]` array.
impl Serialize for FieldDiff {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    (&self.old, &self.new).serialize(serializer)
  }
}

/// Per-field summary of a version range, keyed in registry order.
pub type Diff = BTreeMap<Field, FieldDiff>;

/// Fold entries into a diff. Entries are processed by version, then by
/// insertion order, regardless of the order they are passed in.
pub fn fold(entries: &[ChangeLogEntry]) -> Diff {
  let mut diff = Diff::new();
  for entry in ordered(entries) {
    diff
      .entry(entry.field)
      .and_modify(|d| d.new = entry.new.clone())
      .or_insert_with(|| FieldDiff {
        old: entry.old.clone(),
        new: entry.new.clone(),
      });
  }
  diff
}

/// Fold the entries with version in `(from, to]`. Requires `from < to`.
pub fn diff_range(entries: &[ChangeLogEntry], from: i64, to: i64) -> Result<Diff> {
  if from >= to {
    return Err(Error::conflict(format!(
      "diff requires from < to, got {from} >= {to}"
    )));
  }
  let in_range: Vec<ChangeLogEntry> = entries
    .iter()
    .filter(|e| e.version > from && e.version <= to)
    .cloned()
    .collect();
  Ok(fold(&in_range))
}

/// Chain two adjacent diffs: `earlier` covers `(v1, v2]`, `later` covers
/// `(v2, v3]`.
pub fn compose(earlier: &Diff, later: &Diff) -> Diff {
  let mut out = earlier.clone();
  for (field, d) in later {
    out
      .entry(*field)
      .and_modify(|e| e.new = d.new.clone())
      .or_insert_with(|| d.clone());
  }
  out
}

// ─── Reconstruction and rollback ─────────────────────────────────────────────

/// Rebuild the state of an event as of `target` from its live state, whose
/// times come from `occurrence_id`, and its change log. Does not touch
/// stored state.
pub fn reconstruct(
  current: &EventState,
  occurrence_id: OccurrenceId,
  entries: &[ChangeLogEntry],
  target: i64,
) -> Result<EventState> {
  if target < 1 || target > current.version {
    return Err(Error::not_found(format!(
      "version {target} of event {} (current version is {})",
      current.event_id, current.version
    )));
  }
  if target == current.version {
    return Ok(current.clone());
  }
  let diff = diff_range(&applicable(entries, occurrence_id), target, current.version)?;
  restore(current, &diff, target)
}

/// A planned rollback: the state to write and the per-field values being
/// restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPlan {
  pub state:    EventState,
  pub restored: Diff,
}

/// Plan a rollback of the live state to `target`. Requires
/// `target < current.version`.
pub fn plan_rollback(
  current: &EventState,
  occurrence_id: OccurrenceId,
  entries: &[ChangeLogEntry],
  target: i64,
) -> Result<RollbackPlan> {
  if target >= current.version {
    return Err(Error::conflict(format!(
      "cannot roll back event {} to version {target}: current version is {}",
      current.event_id, current.version
    )));
  }
  if target < 1 {
    return Err(Error::not_found(format!("version {target} of event {}", current.event_id)));
  }
  let restored = diff_range(&applicable(entries, occurrence_id), target, current.version)?;
  let state = restore(current, &restored, target)?;
  Ok(RollbackPlan { state, restored })
}

fn applicable(entries: &[ChangeLogEntry], occurrence_id: OccurrenceId) -> Vec<ChangeLogEntry> {
  entries.iter().filter(|e| e.applies_to(occurrence_id)).cloned().collect()
}

fn restore(current: &EventState, diff: &Diff, target: i64) -> Result<EventState> {
  let mut state = current.clone();
  for (field, d) in diff {
    field.set(&mut state, d.old.clone())?;
  }
  if state.end_time <= state.start_time {
    return Err(Error::conflict(format!(
      "version {target} of event {} would end before it starts",
      current.event_id
    )));
  }
  state.version = target;
  Ok(state)
}
