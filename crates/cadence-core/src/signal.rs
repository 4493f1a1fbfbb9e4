//! Lifecycle signals, time-queue markers, and the traits for the two
//! infrastructure collaborators that carry them.
//!
//! The scheduler writes [`MarkerKey`]s into a [`TimeQueue`] scored by UNIX
//! epoch seconds, drains the due ones, and publishes a [`Signal`] per marker
//! on a [`SignalBus`]. Consumer groups read each topic independently.

use std::{fmt, future::Future, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  event::{EventId, whole_seconds},
};

// ─── Topics and phases ───────────────────────────────────────────────────────

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
pub enum Topic {
  EventStart,
  EventEnd,
  /// Ad hoc "content changed" notices raised by updates.
  SendNotif,
}

impl Topic {
  pub const ALL: [Topic; 3] = [Self::EventStart, Self::EventEnd, Self::SendNotif];

  pub fn name(self) -> &'static str { self.into() }
}

/// Which boundary of an occurrence a marker stands for.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  strum::Display,
  strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
  Start,
  End,
}

impl Phase {
  pub fn topic(self) -> Topic {
    match self {
      Self::Start => Topic::EventStart,
      Self::End => Topic::EventEnd,
    }
  }
}

// ─── Markers ─────────────────────────────────────────────────────────────────

/// Key of a time-queue entry, rendered as `"{event_id}:{phase}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerKey {
  pub event_id: EventId,
  pub phase:    Phase,
}

impl MarkerKey {
  pub fn start(event_id: EventId) -> Self { Self { event_id, phase: Phase::Start } }

  pub fn end(event_id: EventId) -> Self { Self { event_id, phase: Phase::End } }
}

impl fmt::Display for MarkerKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.event_id, self.phase)
  }
}

impl FromStr for MarkerKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let bad = || Error::validation(format!("malformed marker key {s:?}"));
    let (id, phase) = s.split_once(':').ok_or_else(bad)?;
    Ok(Self {
      event_id: id.parse().map_err(|_| bad())?,
      phase:    phase.parse().map_err(|_| bad())?,
    })
  }
}

/// A queued marker and its score in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
  pub key:   MarkerKey,
  pub score: i64,
}

// ─── Signals ─────────────────────────────────────────────────────────────────

/// The message body carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalBody {
  pub event_id: EventId,
  pub topic:    Topic,
}

/// A lifecycle or content-change signal with its emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal {
  pub event_id:   EventId,
  pub topic:      Topic,
  pub emitted_at: DateTime<Utc>,
}

impl Signal {
  pub fn new(event_id: EventId, topic: Topic, emitted_at: DateTime<Utc>) -> Self {
    Self { event_id, topic, emitted_at: whole_seconds(emitted_at) }
  }

  pub fn body(&self) -> SignalBody {
    SignalBody { event_id: self.event_id, topic: self.topic }
  }
}

/// A signal read from the bus, with the offset to commit past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
  pub offset: i64,
  pub signal: Signal,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Time-ordered priority structure holding lifecycle markers.
pub trait TimeQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert `key`, or overwrite its score if it is already queued.
  fn upsert(
    &self,
    key: MarkerKey,
    score: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// All markers with `score <= max_score`, lowest score first. Does not
  /// remove them.
  fn due(
    &self,
    max_score: i64,
  ) -> impl Future<Output = Result<Vec<Marker>, Self::Error>> + Send + '_;

  /// Remove `key`. Returns whether it was queued.
  fn remove(
    &self,
    key: MarkerKey,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// Durable publish/subscribe log. Every consumer group sees every signal of
/// the topics it reads, tracking its own offset per topic. Delivery is
/// at-least-once: a group that fails before committing sees the signal again.
pub trait SignalBus: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append `signal` to its topic and return its offset.
  fn publish(
    &self,
    signal: Signal,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Up to `max` signals on `topic` past `group`'s committed offset, oldest
  /// first.
  fn fetch<'a>(
    &'a self,
    topic: Topic,
    group: &'a str,
    max: usize,
  ) -> impl Future<Output = Result<Vec<Delivery>, Self::Error>> + Send + 'a;

  /// Record that `group` has handled every signal on `topic` with an offset
  /// lower than `next_offset`.
  fn commit<'a>(
    &'a self,
    topic: Topic,
    group: &'a str,
    next_offset: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
