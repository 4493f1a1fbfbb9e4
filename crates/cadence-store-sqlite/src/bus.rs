//! [`SqliteSignalBus`]: a durable topic log with per-group offsets.
//!
//! Signals are appended to the `signals` table. Each consumer group keeps one
//! `next_offset` per topic in `consumer_offsets`; a group that never committed
//! starts from the beginning of the log.
//!
//! A row whose payload cannot be decoded is logged and skipped. When a fetch
//! finds nothing but such rows, the group's offset is moved past them so it
//! cannot stall on them.

use std::path::Path;

use cadence_core::signal::{Delivery, Signal, SignalBody, SignalBus, Topic};
use rusqlite::{OptionalExtension as _, params};
use tracing::warn;

use crate::{
  Result, SqliteStore,
  encode::{decode_ts, encode_ts},
};

#[derive(Clone)]
pub struct SqliteSignalBus {
  conn: tokio_rusqlite::Connection,
}

impl SqliteSignalBus {
  pub(crate) fn new(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }

  /// Open (or create) a standalone bus database at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Ok(SqliteStore::open(path).await?.signal_bus())
  }

  pub async fn open_in_memory() -> Result<Self> {
    Ok(SqliteStore::open_in_memory().await?.signal_bus())
  }

  /// Append a row with an arbitrary payload, bypassing encoding.
  #[cfg(test)]
  pub(crate) async fn publish_raw(&self, topic: Topic, payload: &str) -> Result<i64> {
    let topic = topic.name();
    let payload = payload.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          conn.execute(
            "INSERT INTO signals (topic, payload, emitted_at) VALUES (?1, ?2, 0)",
            params![topic, payload],
          )?;
          Ok(conn.last_insert_rowid())
        })
        .await?,
    )
  }
}

fn decode_delivery(offset: i64, payload: &str, emitted_at: i64) -> Result<Delivery> {
  let body: SignalBody = serde_json::from_str(payload)?;
  Ok(Delivery {
    offset,
    signal: Signal {
      event_id:   body.event_id,
      topic:      body.topic,
      emitted_at: decode_ts(emitted_at)?,
    },
  })
}

impl SignalBus for SqliteSignalBus {
  type Error = crate::Error;

  async fn publish(&self, signal: Signal) -> Result<i64> {
    let payload = serde_json::to_string(&signal.body())?;
    let topic = signal.topic.name();
    let emitted_at = encode_ts(signal.emitted_at);

    let offset = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO signals (topic, payload, emitted_at) VALUES (?1, ?2, ?3)",
          params![topic, payload, emitted_at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(offset)
  }

  async fn fetch(&self, topic: Topic, group: &str, max: usize) -> Result<Vec<Delivery>> {
    let topic_name = topic.name();
    let group_name = group.to_owned();
    let max = max as i64;

    let rows: Vec<(i64, String, i64)> = self
      .conn
      .call(move |conn| {
        let next: i64 = conn
          .query_row(
            "SELECT next_offset FROM consumer_offsets WHERE group_name = ?1 AND topic = ?2",
            params![group_name, topic_name],
            |row| row.get(0),
          )
          .optional()?
          .unwrap_or(0);

        let mut stmt = conn.prepare(
          "SELECT signal_offset, payload, emitted_at FROM signals
           WHERE topic = ?1 AND signal_offset >= ?2
           ORDER BY signal_offset
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(params![topic_name, next, max], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut deliveries = Vec::with_capacity(rows.len());
    for (offset, payload, emitted_at) in &rows {
      match decode_delivery(*offset, payload, *emitted_at) {
        Ok(delivery) => deliveries.push(delivery),
        Err(e) => warn!(topic = %topic, group, offset, error = %e, "skipping undecodable signal"),
      }
    }

    // Good deliveries carry the offset forward when committed. A batch with
    // none would be fetched again forever.
    if deliveries.is_empty()
      && let Some((last, ..)) = rows.last()
    {
      self.commit(topic, group, last + 1).await?;
    }
    Ok(deliveries)
  }

  async fn commit(&self, topic: Topic, group: &str, next_offset: i64) -> Result<()> {
    let topic_name = topic.name();
    let group = group.to_owned();

    self
      .conn
      .call(move |conn| {
        // Offsets only move forward.
        conn.execute(
          "INSERT INTO consumer_offsets (group_name, topic, next_offset) VALUES (?1, ?2, ?3)
           ON CONFLICT (group_name, topic)
           DO UPDATE SET next_offset = MAX(next_offset, excluded.next_offset)",
          params![group, topic_name, next_offset],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
