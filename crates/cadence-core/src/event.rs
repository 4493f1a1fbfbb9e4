//! Event types: descriptive info, occurrences, and recurrence rules.
//!
//! An event is three rows created together: an [`EventInfo`] carrying the
//! versioned descriptive fields, one or more [`Occurrence`]s (one per cycle of
//! a recurring series), and an optional [`RecurrenceRule`].

use chrono::{DateTime, SubsecRound as _, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type EventId = i64;
pub type OccurrenceId = i64;

/// Drop sub-second precision; every stored time is whole seconds.
pub fn whole_seconds(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(0) }

// ─── EventInfo ───────────────────────────────────────────────────────────────

/// The descriptive, versioned part of an event. `version` starts at 1 and is
/// bumped exactly once per accepted update that changes at least one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
  pub event_id:    EventId,
  pub title:       String,
  pub description: Option<String>,
  pub location:    Option<String>,
  pub version:     i64,
}

// ─── Occurrence ──────────────────────────────────────────────────────────────

/// Lifecycle status of a single occurrence.
///
/// ```text
/// Scheduled ──start──▶ Active ──end──▶ Completed
///     │                  │
///     └──────cancel──────┴──────────▶ Cancelled
/// ```
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OccurrenceStatus {
  Scheduled,
  Active,
  Completed,
  Cancelled,
}

impl OccurrenceStatus {
  /// Completed and cancelled occurrences accept no further changes.
  pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Cancelled) }

  pub fn can_transition_to(self, next: Self) -> bool {
    matches!(
      (self, next),
      (Self::Scheduled, Self::Active)
        | (Self::Active, Self::Completed)
        | (Self::Scheduled, Self::Cancelled)
        | (Self::Active, Self::Cancelled)
    )
  }
}

/// One cycle of an event. Each row is independent once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
  pub occurrence_id: OccurrenceId,
  pub event_id:      EventId,
  pub start_time:    DateTime<Utc>,
  pub end_time:      DateTime<Utc>,
  pub status:        OccurrenceStatus,
}

impl Occurrence {
  pub fn duration_secs(&self) -> i64 { (self.end_time - self.start_time).num_seconds() }
}

// ─── Recurrence ──────────────────────────────────────────────────────────────

const HOUR_SECS: i64 = 60 * 60;
const DAY_SECS: i64 = 24 * HOUR_SECS;
/// Calendar arithmetic is approximate: a month is 30 days, a year 365.
const MONTH_SECS: i64 = 30 * DAY_SECS;
const YEAR_SECS: i64 = 365 * DAY_SECS;

/// Counts of hours, days, months, and years that together define the gap
/// between the starts of two consecutive occurrences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
  #[serde(default)]
  pub hour:  i64,
  #[serde(default)]
  pub day:   i64,
  #[serde(default)]
  pub month: i64,
  #[serde(default)]
  pub year:  i64,
}

impl RecurrencePattern {
  /// Seconds between consecutive starts. Counts too large to represent are
  /// a validation error.
  pub fn interval_seconds(&self) -> Result<i64> {
    [
      (self.year, YEAR_SECS),
      (self.month, MONTH_SECS),
      (self.day, DAY_SECS),
      (self.hour, HOUR_SECS),
    ]
    .into_iter()
    .try_fold(0_i64, |total, (count, unit)| {
      count.checked_mul(unit).and_then(|secs| total.checked_add(secs))
    })
    .ok_or_else(|| Error::validation("recurrence interval is too large"))
  }

  fn validate(&self) -> Result<()> {
    if [self.hour, self.day, self.month, self.year].iter().any(|n| *n < 0) {
      return Err(Error::validation("recurrence counts must not be negative"));
    }
    Ok(())
  }
}

/// The recurrence rule attached to an event: a pattern plus the fixed
/// duration of every occurrence, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
  #[serde(flatten)]
  pub pattern:  RecurrencePattern,
  pub duration: i64,
}

impl RecurrenceRule {
  pub fn interval_seconds(&self) -> Result<i64> { self.pattern.interval_seconds() }

  /// The interval must be strictly longer than an occurrence, otherwise
  /// consecutive occurrences would overlap.
  pub fn validate(&self) -> Result<()> {
    self.pattern.validate()?;
    if self.duration <= 0 {
      return Err(Error::validation("occurrence duration must be positive"));
    }
    let interval = self.interval_seconds()?;
    if chrono::Duration::try_seconds(interval).is_none() {
      return Err(Error::validation("recurrence interval is too large"));
    }
    if interval <= self.duration {
      return Err(Error::validation(format!(
        "recurrence interval ({interval}s) must be greater than the event duration ({}s)",
        self.duration,
      )));
    }
    Ok(())
  }

  /// Start and end of the occurrence following one that started at
  /// `previous_start`. Fails if either falls outside the representable range.
  pub fn next_after(
    &self,
    previous_start: DateTime<Utc>,
  ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let out_of_range = || Error::validation("next occurrence is out of range");
    let interval = chrono::Duration::try_seconds(self.interval_seconds()?).ok_or_else(out_of_range)?;
    let duration = chrono::Duration::try_seconds(self.duration).ok_or_else(out_of_range)?;
    let start = previous_start.checked_add_signed(interval).ok_or_else(out_of_range)?;
    let end = start.checked_add_signed(duration).ok_or_else(out_of_range)?;
    Ok((start, end))
  }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Input to [`crate::store::EventStore::create_event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
  pub title:        String,
  pub description:  Option<String>,
  pub location:     Option<String>,
  pub start_time:   DateTime<Utc>,
  pub end_time:     DateTime<Utc>,
  /// Declares the event recurring; a pattern must then be supplied.
  #[serde(default)]
  pub is_recurring: bool,
  pub recurrence:   Option<RecurrencePattern>,
}

impl NewEvent {
  /// Convenience constructor for a one-time event.
  pub fn new(
    title: impl Into<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
  ) -> Self {
    Self {
      title: title.into(),
      description: None,
      location: None,
      start_time,
      end_time,
      is_recurring: false,
      recurrence: None,
    }
  }

  pub fn recurring(mut self, pattern: RecurrencePattern) -> Self {
    self.is_recurring = true;
    self.recurrence = Some(pattern);
    self
  }

  /// Truncate times to whole seconds, the precision the store keeps.
  pub fn normalized(mut self) -> Self {
    self.start_time = whole_seconds(self.start_time);
    self.end_time = whole_seconds(self.end_time);
    self
  }

  pub fn duration_secs(&self) -> i64 { (self.end_time - self.start_time).num_seconds() }

  /// The rule to persist alongside the event, if it recurs.
  pub fn recurrence_rule(&self) -> Option<RecurrenceRule> {
    self.recurrence.map(|pattern| RecurrenceRule {
      pattern,
      duration: self.duration_secs(),
    })
  }

  /// Reject bad time ranges and recurrence that would overlap itself.
  pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(Error::validation("title must not be empty"));
    }
    if self.start_time < whole_seconds(now) {
      return Err(Error::validation("start time cannot be in the past"));
    }
    if self.end_time <= self.start_time {
      return Err(Error::validation("end time must be after start time"));
    }
    if self.is_recurring && self.recurrence.is_none() {
      return Err(Error::validation("recurrence pattern required for recurring events"));
    }
    if let Some(rule) = self.recurrence_rule() {
      rule.validate()?;
    }
    Ok(())
  }
}

/// Partial update to the recurrence counts; absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceUpdate {
  pub hour:  Option<i64>,
  pub day:   Option<i64>,
  pub month: Option<i64>,
  pub year:  Option<i64>,
}

/// Partial update payload. A field that is `None` is not part of the update;
/// a present field equal to the current value is not a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
  pub title:       Option<String>,
  pub description: Option<String>,
  pub location:    Option<String>,
  pub start_time:  Option<DateTime<Utc>>,
  pub end_time:    Option<DateTime<Utc>>,
  pub recurrence:  Option<RecurrenceUpdate>,
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// An event as stored: its info, its rule, and its current occurrence.
///
/// The current occurrence is the earliest scheduled-or-active occurrence by
/// start time, or the latest one when the series has no open occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
  pub info:       EventInfo,
  pub recurrence: Option<RecurrenceRule>,
  pub occurrence: Occurrence,
}

impl EventRecord {
  /// The versioned view of this record.
  pub fn state(&self) -> EventState {
    EventState {
      event_id:    self.info.event_id,
      title:       self.info.title.clone(),
      description: self.info.description.clone(),
      location:    self.info.location.clone(),
      version:     self.info.version,
      start_time:  self.occurrence.start_time,
      end_time:    self.occurrence.end_time,
      recurrence:  self.recurrence,
    }
  }
}

/// Every field tracked by the change log, as of some version. Produced for
/// the live event and by reconstruction of past versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
  pub event_id:    EventId,
  pub title:       String,
  pub description: Option<String>,
  pub location:    Option<String>,
  pub version:     i64,
  pub start_time:  DateTime<Utc>,
  pub end_time:    DateTime<Utc>,
  pub recurrence:  Option<RecurrenceRule>,
}

impl EventState {
  pub fn duration_secs(&self) -> i64 { (self.end_time - self.start_time).num_seconds() }
}
