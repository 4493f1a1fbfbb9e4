//! The field registry: every field the change log tracks, with its value kind,
//! the entity that owns it, and typed accessors over [`EventState`].
//!
//! Change-log rows store values as text. The registry is the only place that
//! knows how to turn a field name and its stored text back into a typed
//! value, and which entity a restored value has to be written to.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, event::{EventState, RecurrenceRule}};

// ─── Typed values ────────────────────────────────────────────────────────────

/// The native type of a tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  Integer,
  Text,
  Timestamp,
}

impl FieldKind {
  /// Parse the stored text form of a value of this kind.
  pub fn decode(self, raw: &str) -> Option<TypedValue> {
    match self {
      Self::Integer => raw.parse().ok().map(TypedValue::Integer),
      Self::Text => Some(TypedValue::Text(raw.to_owned())),
      Self::Timestamp => DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| TypedValue::Timestamp(dt.with_timezone(&Utc))),
    }
  }
}

/// A field value with an explicit kind. Absence (SQL `NULL`) is modelled as
/// `Option<TypedValue>::None`, never as an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
  Integer(i64),
  Text(String),
  Timestamp(DateTime<Utc>),
}

impl TypedValue {
  pub fn kind(&self) -> FieldKind {
    match self {
      Self::Integer(_) => FieldKind::Integer,
      Self::Text(_) => FieldKind::Text,
      Self::Timestamp(_) => FieldKind::Timestamp,
    }
  }

  /// The text stored in the `old_val` / `new_val` columns.
  pub fn encode(&self) -> String {
    match self {
      Self::Integer(n) => n.to_string(),
      Self::Text(s) => s.clone(),
      Self::Timestamp(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
  }

  fn into_integer(self, field: Field) -> Result<i64> {
    match self {
      Self::Integer(n) => Ok(n),
      other => Err(mismatch(field, &other)),
    }
  }

  fn into_text(self, field: Field) -> Result<String> {
    match self {
      Self::Text(s) => Ok(s),
      other => Err(mismatch(field, &other)),
    }
  }

  fn into_timestamp(self, field: Field) -> Result<DateTime<Utc>> {
    match self {
      Self::Timestamp(dt) => Ok(dt),
      other => Err(mismatch(field, &other)),
    }
  }
}

impl fmt::Display for TypedValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.encode()) }
}

impl From<String> for TypedValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<&str> for TypedValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<i64> for TypedValue {
  fn from(n: i64) -> Self { Self::Integer(n) }
}

impl From<DateTime<Utc>> for TypedValue {
  fn from(dt: DateTime<Utc>) -> Self { Self::Timestamp(dt) }
}

fn mismatch(field: Field, value: &TypedValue) -> Error {
  Error::validation(format!(
    "field {field} expects {:?}, got {:?}",
    field.kind(),
    value.kind()
  ))
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Which stored entity a field lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOwner {
  EventInfo,
  /// The event's current occurrence.
  Occurrence,
  Recurrence,
}

/// A tracked field. Declaration order is the order changes are recorded in
/// within one version, and the key order of diffs.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
  Title,
  Description,
  Location,
  StartTime,
  EndTime,
  RecurrenceHour,
  RecurrenceDay,
  RecurrenceMonth,
  RecurrenceYear,
  RecurrenceDuration,
}

impl Field {
  pub const ALL: [Field; 10] = [
    Self::Title,
    Self::Description,
    Self::Location,
    Self::StartTime,
    Self::EndTime,
    Self::RecurrenceHour,
    Self::RecurrenceDay,
    Self::RecurrenceMonth,
    Self::RecurrenceYear,
    Self::RecurrenceDuration,
  ];

  /// The name stored in the `field_name` column.
  pub fn name(self) -> &'static str { self.into() }

  /// Resolve a stored field name.
  pub fn from_name(name: &str) -> Result<Self> {
    name.parse().map_err(|_| Error::Corrupt {
      field: name.to_owned(),
      value: "<unknown field>".to_owned(),
    })
  }

  pub fn kind(self) -> FieldKind {
    match self {
      Self::Title | Self::Description | Self::Location => FieldKind::Text,
      Self::StartTime | Self::EndTime => FieldKind::Timestamp,
      Self::RecurrenceHour
      | Self::RecurrenceDay
      | Self::RecurrenceMonth
      | Self::RecurrenceYear
      | Self::RecurrenceDuration => FieldKind::Integer,
    }
  }

  pub fn owner(self) -> FieldOwner {
    match self {
      Self::Title | Self::Description | Self::Location => FieldOwner::EventInfo,
      Self::StartTime | Self::EndTime => FieldOwner::Occurrence,
      _ => FieldOwner::Recurrence,
    }
  }

  pub fn nullable(self) -> bool { matches!(self, Self::Description | Self::Location) }

  /// Decode a stored column value for this field.
  pub fn decode(self, raw: Option<&str>) -> Result<Option<TypedValue>> {
    raw
      .map(|s| {
        self.kind().decode(s).ok_or_else(|| Error::Corrupt {
          field: self.name().to_owned(),
          value: s.to_owned(),
        })
      })
      .transpose()
  }

  /// Read this field from `state`. Recurrence fields read as `None` when the
  /// event has no rule.
  pub fn get(self, state: &EventState) -> Option<TypedValue> {
    let rule = state.recurrence.as_ref();
    match self {
      Self::Title => Some(TypedValue::Text(state.title.clone())),
      Self::Description => state.description.clone().map(TypedValue::Text),
      Self::Location => state.location.clone().map(TypedValue::Text),
      Self::StartTime => Some(TypedValue::Timestamp(state.start_time)),
      Self::EndTime => Some(TypedValue::Timestamp(state.end_time)),
      Self::RecurrenceHour => rule.map(|r| TypedValue::Integer(r.pattern.hour)),
      Self::RecurrenceDay => rule.map(|r| TypedValue::Integer(r.pattern.day)),
      Self::RecurrenceMonth => rule.map(|r| TypedValue::Integer(r.pattern.month)),
      Self::RecurrenceYear => rule.map(|r| TypedValue::Integer(r.pattern.year)),
      Self::RecurrenceDuration => rule.map(|r| TypedValue::Integer(r.duration)),
    }
  }

  /// Write `value` into `state`, checking its kind and nullability.
  pub fn set(self, state: &mut EventState, value: Option<TypedValue>) -> Result<()> {
    match self {
      Self::Title => state.title = self.required(value)?.into_text(self)?,
      Self::Description => {
        state.description = value.map(|v| v.into_text(self)).transpose()?
      }
      Self::Location => state.location = value.map(|v| v.into_text(self)).transpose()?,
      Self::StartTime => state.start_time = self.required(value)?.into_timestamp(self)?,
      Self::EndTime => state.end_time = self.required(value)?.into_timestamp(self)?,
      Self::RecurrenceHour => {
        let n = self.required(value)?.into_integer(self)?;
        self.rule_mut(state)?.pattern.hour = n;
      }
      Self::RecurrenceDay => {
        let n = self.required(value)?.into_integer(self)?;
        self.rule_mut(state)?.pattern.day = n;
      }
      Self::RecurrenceMonth => {
        let n = self.required(value)?.into_integer(self)?;
        self.rule_mut(state)?.pattern.month = n;
      }
      Self::RecurrenceYear => {
        let n = self.required(value)?.into_integer(self)?;
        self.rule_mut(state)?.pattern.year = n;
      }
      Self::RecurrenceDuration => {
        let n = self.required(value)?.into_integer(self)?;
        self.rule_mut(state)?.duration = n;
      }
    }
    Ok(())
  }

  fn required(self, value: Option<TypedValue>) -> Result<TypedValue> {
    value.ok_or_else(|| Error::validation(format!("field {self} cannot be null")))
  }

  fn rule_mut(self, state: &mut EventState) -> Result<&mut RecurrenceRule> {
    state.recurrence.as_mut().ok_or_else(|| {
      Error::validation(format!(
        "field {self} belongs to a recurrence rule but event {} has none",
        state.event_id
      ))
    })
  }
}
