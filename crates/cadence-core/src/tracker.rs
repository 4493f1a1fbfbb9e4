//! Change tracking: turn a partial update into the exact set of field changes
//! and the state that results from applying them.
//!
//! Planning is pure. The store runs it inside the same transaction that
//! persists the new state and the change-log batch, so a failed plan or a
//! failed write leaves nothing behind.

use serde::Serialize;

use crate::{
  Error, Result,
  event::{EventState, EventUpdate, OccurrenceStatus, whole_seconds},
  field::{Field, TypedValue},
};

/// One recorded `(old, new)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
  pub field: Field,
  pub old:   Option<TypedValue>,
  pub new:   Option<TypedValue>,
}

/// The outcome of planning an update against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
  /// State after the update. `version` is already bumped when anything
  /// changed.
  pub state:   EventState,
  /// Changes in registry order; empty for a no-op update.
  pub changes: Vec<FieldChange>,
}

impl UpdatePlan {
  pub fn is_noop(&self) -> bool { self.changes.is_empty() }
}

/// Enforce the occurrence state machine on an incoming update.
pub fn check_preconditions(status: OccurrenceStatus, update: &EventUpdate) -> Result<()> {
  if status.is_terminal() {
    return Err(Error::validation(format!("cannot update a {status} event")));
  }
  if status == OccurrenceStatus::Active && update.start_time.is_some() {
    return Err(Error::validation("cannot modify the start time of an active event"));
  }
  Ok(())
}

/// Compute which fields `update` changes, apply them to a copy of `current`,
/// and bump the version by exactly one if any field changed.
pub fn plan_update(
  current: &EventState,
  status: OccurrenceStatus,
  update: &EventUpdate,
) -> Result<UpdatePlan> {
  check_preconditions(status, update)?;
  if update.recurrence.is_some() && current.recurrence.is_none() {
    return Err(Error::validation(
      "cannot add recurrence to a one-time event; create a new recurring event instead",
    ));
  }
  if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
    return Err(Error::validation("title must not be empty"));
  }

  let mut next = current.clone();
  let mut changes = Vec::new();

  for (field, value) in proposals(update) {
    let old = field.get(current);
    if old == value {
      continue;
    }
    field.set(&mut next, value.clone())?;
    changes.push(FieldChange { field, old, new: value });
  }

  if changes.is_empty() {
    return Ok(UpdatePlan { state: next, changes });
  }

  if next.end_time <= next.start_time {
    return Err(Error::validation("end time must be after start time"));
  }

  let times_changed = changes
    .iter()
    .any(|c| matches!(c.field, Field::StartTime | Field::EndTime));
  let duration = next.duration_secs();
  if let Some(rule) = next.recurrence.as_mut() {
    if times_changed && rule.duration != duration {
      changes.push(FieldChange {
        field: Field::RecurrenceDuration,
        old:   Some(TypedValue::Integer(rule.duration)),
        new:   Some(TypedValue::Integer(duration)),
      });
      rule.duration = duration;
    }
    rule.validate()?;
  }

  changes.sort_by_key(|c| c.field);
  next.version = current.version + 1;
  Ok(UpdatePlan { state: next, changes })
}

/// Every field present in the payload with the value it proposes.
fn proposals(update: &EventUpdate) -> Vec<(Field, Option<TypedValue>)> {
  let mut out = Vec::new();
  let mut text = |field, value: &Option<String>| {
    if let Some(v) = value {
      out.push((field, Some(TypedValue::Text(v.clone()))));
    }
  };
  text(Field::Title, &update.title);
  text(Field::Description, &update.description);
  text(Field::Location, &update.location);

  if let Some(t) = update.start_time {
    out.push((Field::StartTime, Some(TypedValue::Timestamp(whole_seconds(t)))));
  }
  if let Some(t) = update.end_time {
    out.push((Field::EndTime, Some(TypedValue::Timestamp(whole_seconds(t)))));
  }

  if let Some(r) = update.recurrence {
    let counts = [
      (Field::RecurrenceHour, r.hour),
      (Field::RecurrenceDay, r.day),
      (Field::RecurrenceMonth, r.month),
      (Field::RecurrenceYear, r.year),
    ];
    for (field, value) in counts {
      if let Some(n) = value {
        out.push((field, Some(TypedValue::Integer(n))));
      }
    }
  }
  out
}
