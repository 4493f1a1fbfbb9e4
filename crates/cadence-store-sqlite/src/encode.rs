//! Encoding and decoding helpers between Rust domain types and the values
//! stored in SQLite columns.
//!
//! Occurrence and signal times are stored as UNIX epoch seconds so range
//! scans are integer comparisons. Audit timestamps (`created_at`,
//! `changed_at`) are RFC 3339 text. Change-log values go through the field
//! registry's typed encoding.

use cadence_core::{
  access::{AccessGrant, AccessLevel},
  event::{Occurrence, OccurrenceStatus},
  field::{Field, TypedValue},
  history::ChangeLogEntry,
  user::User,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_ts(dt: DateTime<Utc>) -> i64 { dt.timestamp() }

pub fn decode_ts(secs: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp(secs, 0)
    .ok_or_else(|| Error::DateParse(format!("epoch seconds out of range: {secs}")))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_status(s: OccurrenceStatus) -> &'static str { s.into() }

pub fn decode_status(s: &str) -> Result<OccurrenceStatus> {
  s.parse().map_err(|_| corrupt("status", s))
}

pub fn encode_level(l: AccessLevel) -> &'static str { l.into() }

pub fn decode_level(s: &str) -> Result<AccessLevel> {
  s.parse().map_err(|_| corrupt("level", s))
}

fn corrupt(field: &str, value: &str) -> Error {
  Error::Core(cadence_core::Error::Corrupt {
    field: field.to_owned(),
    value: value.to_owned(),
  })
}

// ─── Typed values ────────────────────────────────────────────────────────────

pub fn encode_value(v: Option<&TypedValue>) -> Option<String> { v.map(TypedValue::encode) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const OCCURRENCE_COLUMNS: &str = "occurrence_id, event_id, start_ts, end_ts, status";

pub struct RawOccurrence {
  pub occurrence_id: i64,
  pub event_id:      i64,
  pub start_ts:      i64,
  pub end_ts:        i64,
  pub status:        String,
}

impl RawOccurrence {
  /// Read the columns of [`OCCURRENCE_COLUMNS`] starting at `at`.
  pub fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      occurrence_id: row.get(at)?,
      event_id:      row.get(at + 1)?,
      start_ts:      row.get(at + 2)?,
      end_ts:        row.get(at + 3)?,
      status:        row.get(at + 4)?,
    })
  }

  pub fn into_occurrence(self) -> Result<Occurrence> {
    Ok(Occurrence {
      occurrence_id: self.occurrence_id,
      event_id:      self.event_id,
      start_time:    decode_ts(self.start_ts)?,
      end_time:      decode_ts(self.end_ts)?,
      status:        decode_status(&self.status)?,
    })
  }
}

/// Raw values read directly from a `change_log` row.
pub struct RawChangeLogEntry {
  pub id:            i64,
  pub event_id:      i64,
  pub version:       i64,
  pub field_name:    String,
  pub old_val:       Option<String>,
  pub new_val:       Option<String>,
  pub changed_at:    String,
  pub occurrence_id: Option<i64>,
}

impl RawChangeLogEntry {
  pub fn into_entry(self) -> Result<ChangeLogEntry> {
    let field = Field::from_name(&self.field_name)?;
    Ok(ChangeLogEntry {
      id: self.id,
      event_id: self.event_id,
      version: self.version,
      field,
      old: field.decode(self.old_val.as_deref())?,
      new: field.decode(self.new_val.as_deref())?,
      changed_at: decode_dt(&self.changed_at)?,
      occurrence_id: self.occurrence_id,
    })
  }
}

pub struct RawGrant {
  pub event_id: i64,
  pub user_id:  i64,
  pub level:    String,
}

impl RawGrant {
  pub fn into_grant(self) -> Result<AccessGrant> {
    Ok(AccessGrant {
      event_id: self.event_id,
      user_id:  self.user_id,
      level:    decode_level(&self.level)?,
    })
  }
}

pub struct RawUser {
  pub user_id:    i64,
  pub email:      String,
  pub created_at: String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:    self.user_id,
      email:      self.email,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
