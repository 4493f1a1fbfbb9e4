//! [`SqliteStore`]: the SQLite implementation of [`EventStore`].
//!
//! Every multi-row write runs inside one `rusqlite` transaction on the
//! connection thread. Domain checks that need the stored state (change
//! tracking, rollback planning, share rules) run inside that same closure, so
//! a rejected request never leaves a partial write behind.

use std::path::Path;

use cadence_core::{
  Error as CoreError,
  access::{self, AccessGrant, AccessLevel, ShareTarget},
  event::{
    EventId, EventInfo, EventRecord, EventState, EventUpdate, NewEvent, Occurrence,
    OccurrenceStatus, RecurrencePattern, RecurrenceRule,
  },
  field::FieldOwner,
  history::{self, ChangeLogEntry},
  store::{
    Activation, EventQuery, EventSort, EventStore, EventSummary, RollbackOutcome,
    UpdateOutcome,
  },
  tracker::{self, FieldChange},
  user::{User, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  bus::SqliteSignalBus,
  encode::{
    OCCURRENCE_COLUMNS, RawChangeLogEntry, RawGrant, RawOccurrence, RawUser, decode_level,
    encode_dt, encode_level, encode_status, encode_ts, encode_value,
  },
  error::{CallResult, abort},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cadence event store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection handle is shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store. Useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// A signal bus sharing this store's database.
  pub fn signal_bus(&self) -> SqliteSignalBus { SqliteSignalBus::new(self.conn.clone()) }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// These run on the connection thread, usually against an open transaction
// (which derefs to `Connection`).

/// The earliest open occurrence, or the latest one if none is open.
const CURRENT_OCCURRENCE: &str = "
  SELECT occurrence_id, event_id, start_ts, end_ts, status
  FROM occurrences
  WHERE event_id = ?1
  ORDER BY
    CASE WHEN status IN ('scheduled', 'active') THEN 0 ELSE 1 END,
    CASE WHEN status IN ('scheduled', 'active') THEN start_ts ELSE -start_ts END
  LIMIT 1";

fn not_found(what: String) -> tokio_rusqlite::Error { abort(CoreError::NotFound(what)) }

fn read_occurrences(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> CallResult<Vec<Occurrence>> {
  let mut stmt = conn.prepare(sql)?;
  let raws = stmt
    .query_map(params, |row| RawOccurrence::read(row, 0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|raw| raw.into_occurrence().map_err(abort))
    .collect()
}

fn read_current(conn: &Connection, event_id: EventId) -> CallResult<Option<Occurrence>> {
  let raw = conn
    .query_row(CURRENT_OCCURRENCE, params![event_id], |row| RawOccurrence::read(row, 0))
    .optional()?;
  raw.map(|r| r.into_occurrence().map_err(abort)).transpose()
}

fn read_rule(conn: &Connection, event_id: EventId) -> CallResult<Option<RecurrenceRule>> {
  Ok(
    conn
      .query_row(
        "SELECT hour, day, month, year, duration FROM recurrence_rules WHERE event_id = ?1",
        params![event_id],
        |row| {
          Ok(RecurrenceRule {
            pattern:  RecurrencePattern {
              hour:  row.get(0)?,
              day:   row.get(1)?,
              month: row.get(2)?,
              year:  row.get(3)?,
            },
            duration: row.get(4)?,
          })
        },
      )
      .optional()?,
  )
}

fn read_record(conn: &Connection, event_id: EventId) -> CallResult<Option<EventRecord>> {
  let info = conn
    .query_row(
      "SELECT event_id, title, description, location, version
       FROM event_info WHERE event_id = ?1",
      params![event_id],
      |row| {
        Ok(EventInfo {
          event_id:    row.get(0)?,
          title:       row.get(1)?,
          description: row.get(2)?,
          location:    row.get(3)?,
          version:     row.get(4)?,
        })
      },
    )
    .optional()?;
  let Some(info) = info else {
    return Ok(None);
  };

  let recurrence = read_rule(conn, event_id)?;
  let occurrence = read_current(conn, event_id)?
    .ok_or_else(|| not_found(format!("occurrence of event {event_id}")))?;

  Ok(Some(EventRecord { info, recurrence, occurrence }))
}

fn require_record(conn: &Connection, event_id: EventId) -> CallResult<EventRecord> {
  read_record(conn, event_id)?.ok_or_else(|| not_found(format!("event {event_id}")))
}

fn event_exists(conn: &Connection, event_id: EventId) -> CallResult<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM event_info WHERE event_id = ?1", params![event_id], |_| {
        Ok(true)
      })
      .optional()?
      .unwrap_or(false),
  )
}

fn user_exists(conn: &Connection, user_id: UserId) -> CallResult<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM users WHERE user_id = ?1", params![user_id], |_| Ok(true))
      .optional()?
      .unwrap_or(false),
  )
}

fn read_change_log(
  conn: &Connection,
  event_id: EventId,
  after_version: i64,
) -> CallResult<Vec<ChangeLogEntry>> {
  let mut stmt = conn.prepare(
    "SELECT id, event_id, version, field_name, old_val, new_val, changed_at, occurrence_id
     FROM change_log
     WHERE event_id = ?1 AND version > ?2
     ORDER BY version, id",
  )?;
  let raws = stmt
    .query_map(params![event_id, after_version], |row| {
      Ok(RawChangeLogEntry {
        id:            row.get(0)?,
        event_id:      row.get(1)?,
        version:       row.get(2)?,
        field_name:    row.get(3)?,
        old_val:       row.get(4)?,
        new_val:       row.get(5)?,
        changed_at:    row.get(6)?,
        occurrence_id: row.get(7)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|raw| raw.into_entry().map_err(abort))
    .collect()
}

fn read_grant(
  conn: &Connection,
  event_id: EventId,
  user_id: UserId,
) -> CallResult<Option<AccessGrant>> {
  let raw = conn
    .query_row(
      "SELECT event_id, user_id, level FROM access_grants
       WHERE event_id = ?1 AND user_id = ?2",
      params![event_id, user_id],
      |row| {
        Ok(RawGrant {
          event_id: row.get(0)?,
          user_id:  row.get(1)?,
          level:    row.get(2)?,
        })
      },
    )
    .optional()?;
  raw.map(|r| r.into_grant().map_err(abort)).transpose()
}

fn read_grants(conn: &Connection, event_id: EventId) -> CallResult<Vec<AccessGrant>> {
  let mut stmt = conn.prepare(
    "SELECT event_id, user_id, level FROM access_grants
     WHERE event_id = ?1 ORDER BY user_id",
  )?;
  let raws = stmt
    .query_map(params![event_id], |row| {
      Ok(RawGrant {
        event_id: row.get(0)?,
        user_id:  row.get(1)?,
        level:    row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|raw| raw.into_grant().map_err(abort))
    .collect()
}

/// Insert info, first occurrence, rule, and owner grant for one event.
fn insert_event(conn: &Connection, input: &NewEvent, owner: UserId) -> CallResult<EventRecord> {
  if !user_exists(conn, owner)? {
    return Err(abort(CoreError::validation(format!("user {owner} does not exist"))));
  }

  conn.execute(
    "INSERT INTO event_info (title, description, location, version) VALUES (?1, ?2, ?3, 1)",
    params![input.title, input.description, input.location],
  )?;
  let event_id = conn.last_insert_rowid();

  conn.execute(
    "INSERT INTO occurrences (event_id, start_ts, end_ts, status) VALUES (?1, ?2, ?3, ?4)",
    params![
      event_id,
      encode_ts(input.start_time),
      encode_ts(input.end_time),
      encode_status(OccurrenceStatus::Scheduled),
    ],
  )?;
  let occurrence_id = conn.last_insert_rowid();

  let recurrence = input.recurrence_rule();
  if let Some(rule) = &recurrence {
    conn.execute(
      "INSERT INTO recurrence_rules (event_id, hour, day, month, year, duration)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        event_id,
        rule.pattern.hour,
        rule.pattern.day,
        rule.pattern.month,
        rule.pattern.year,
        rule.duration,
      ],
    )?;
  }

  conn.execute(
    "INSERT INTO access_grants (user_id, event_id, level) VALUES (?1, ?2, ?3)",
    params![owner, event_id, encode_level(AccessLevel::Owner)],
  )?;

  Ok(EventRecord {
    info: EventInfo {
      event_id,
      title: input.title.clone(),
      description: input.description.clone(),
      location: input.location.clone(),
      version: 1,
    },
    recurrence,
    occurrence: Occurrence {
      occurrence_id,
      event_id,
      start_time: input.start_time,
      end_time: input.end_time,
      status: OccurrenceStatus::Scheduled,
    },
  })
}

/// Write every tracked field of `state` to the rows that own it. Time fields
/// go to the record's current occurrence.
fn write_state(conn: &Connection, record: &EventRecord, state: &EventState) -> CallResult<()> {
  conn.execute(
    "UPDATE event_info SET title = ?2, description = ?3, location = ?4, version = ?5
     WHERE event_id = ?1",
    params![state.event_id, state.title, state.description, state.location, state.version],
  )?;

  let occurrence = &record.occurrence;
  if occurrence.start_time != state.start_time || occurrence.end_time != state.end_time {
    if state.end_time <= state.start_time {
      return Err(abort(CoreError::validation("end time must be after start time")));
    }
    let clash: bool = conn.query_row(
      "SELECT EXISTS (
         SELECT 1 FROM occurrences
         WHERE event_id = ?1 AND start_ts = ?2 AND occurrence_id != ?3
       )",
      params![state.event_id, encode_ts(state.start_time), occurrence.occurrence_id],
      |row| row.get(0),
    )?;
    if clash {
      return Err(abort(CoreError::validation(format!(
        "event {} already has an occurrence starting at {}",
        state.event_id, state.start_time
      ))));
    }
    conn.execute(
      "UPDATE occurrences SET start_ts = ?2, end_ts = ?3 WHERE occurrence_id = ?1",
      params![
        occurrence.occurrence_id,
        encode_ts(state.start_time),
        encode_ts(state.end_time),
      ],
    )?;
  }

  if let Some(rule) = &state.recurrence {
    conn.execute(
      "UPDATE recurrence_rules SET hour = ?2, day = ?3, month = ?4, year = ?5, duration = ?6
       WHERE event_id = ?1",
      params![
        state.event_id,
        rule.pattern.hour,
        rule.pattern.day,
        rule.pattern.month,
        rule.pattern.year,
        rule.duration,
      ],
    )?;
  }
  Ok(())
}

/// Append one change-log batch. Time changes are tagged with the occurrence
/// they were written to.
fn insert_changes(
  conn: &Connection,
  record: &EventRecord,
  version: i64,
  changes: &[FieldChange],
  changed_at: &str,
) -> CallResult<()> {
  let mut stmt = conn.prepare_cached(
    "INSERT INTO change_log
       (event_id, version, field_name, old_val, new_val, changed_at, occurrence_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
  )?;
  for change in changes {
    let occurrence_id = (change.field.owner() == FieldOwner::Occurrence)
      .then_some(record.occurrence.occurrence_id);
    stmt.execute(params![
      record.info.event_id,
      version,
      change.field.name(),
      encode_value(change.old.as_ref()),
      encode_value(change.new.as_ref()),
      changed_at,
      occurrence_id,
    ])?;
  }
  Ok(())
}

fn set_status(
  conn: &Connection,
  occurrence: &mut Occurrence,
  next: OccurrenceStatus,
) -> CallResult<()> {
  conn.execute(
    "UPDATE occurrences SET status = ?3 WHERE occurrence_id = ?1 AND status = ?2",
    params![
      occurrence.occurrence_id,
      encode_status(occurrence.status),
      encode_status(next),
    ],
  )?;
  occurrence.status = next;
  Ok(())
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn add_user(&self, email: String) -> Result<User> {
    let email = email.trim().to_owned();
    if email.is_empty() {
      return Err(CoreError::validation("email must not be empty").into());
    }
    let created_at = Utc::now();
    let at_str = encode_dt(created_at);

    let (user_id, email) = self
      .conn
      .call(move |conn| {
        let taken = conn
          .query_row("SELECT 1 FROM users WHERE email = ?1", params![email], |_| Ok(()))
          .optional()?
          .is_some();
        if taken {
          return Err(abort(CoreError::conflict(format!("email {email} is already registered"))));
        }
        conn.execute(
          "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
          params![email, at_str],
        )?;
        Ok((conn.last_insert_rowid(), email))
      })
      .await?;

    Ok(User { user_id, email, created_at })
  }

  async fn get_users(&self, ids: Vec<UserId>) -> Result<Vec<User>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let raws: Vec<RawUser> = self
      .conn
      .call(move |conn| {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
          "SELECT user_id, email, created_at FROM users
           WHERE user_id IN ({placeholders}) ORDER BY user_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok(RawUser {
              user_id:    row.get(0)?,
              email:      row.get(1)?,
              created_at: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUser::into_user).collect()
  }

  // ── Events ────────────────────────────────────────────────────────────────

  async fn create_event(&self, input: NewEvent, owner: UserId) -> Result<EventRecord> {
    let input = input.normalized();
    let record = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = insert_event(&tx, &input, owner)?;
        tx.commit()?;
        Ok(record)
      })
      .await?;
    Ok(record)
  }

  async fn create_events(
    &self,
    inputs: Vec<NewEvent>,
    owner: UserId,
  ) -> Result<Vec<EventRecord>> {
    let inputs: Vec<NewEvent> = inputs.into_iter().map(NewEvent::normalized).collect();
    let records = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let records = inputs
          .iter()
          .map(|input| insert_event(&tx, input, owner))
          .collect::<CallResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(records)
      })
      .await?;
    Ok(records)
  }

  async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
    Ok(self.conn.call(move |conn| read_record(conn, event_id)).await?)
  }

  async fn update_event(&self, event_id: EventId, update: EventUpdate) -> Result<UpdateOutcome> {
    let changed_at = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = require_record(&tx, event_id)?;
        let plan = tracker::plan_update(&record.state(), record.occurrence.status, &update)
          .map_err(abort)?;

        if !plan.is_noop() {
          write_state(&tx, &record, &plan.state)?;
          insert_changes(&tx, &record, plan.state.version, &plan.changes, &changed_at)?;
        }
        tx.commit()?;

        Ok(UpdateOutcome { version: plan.state.version, changes: plan.changes })
      })
      .await?;
    Ok(outcome)
  }

  async fn delete_event(&self, event_id: EventId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !event_exists(&tx, event_id)? {
          return Err(not_found(format!("event {event_id}")));
        }
        // Dependents first.
        for table in [
          "change_log",
          "access_grants",
          "occurrences",
          "recurrence_rules",
          "event_info",
        ] {
          tx.execute(&format!("DELETE FROM {table} WHERE event_id = ?1"), params![event_id])?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    debug!(event_id, "event deleted");
    Ok(())
  }

  async fn list_events(&self, user_id: UserId, query: &EventQuery) -> Result<Vec<EventSummary>> {
    let text = query.text.as_deref().map(|t| format!("%{t}%"));
    let status = query.status.map(encode_status);
    let level = query.level.map(encode_level);
    let order = match query.sort {
      EventSort::StartTime => "o.start_ts",
      EventSort::Title => "e.title",
      EventSort::Status => "o.status",
    };
    let direction = if query.descending { "DESC" } else { "ASC" };
    // A negative LIMIT means no limit in SQLite.
    let limit = query.limit.map_or(-1, |l| l as i64);
    let offset = query.offset.unwrap_or(0) as i64;

    let sql = format!(
      "SELECT e.event_id, e.title, e.description, e.location, e.version,
              g.level,
              o.occurrence_id, o.event_id, o.start_ts, o.end_ts, o.status,
              r.hour, r.day, r.month, r.year, r.duration
       FROM access_grants g
       JOIN event_info e ON e.event_id = g.event_id
       JOIN occurrences o ON o.occurrence_id = (
         SELECT occurrence_id FROM occurrences
         WHERE event_id = e.event_id
         ORDER BY
           CASE WHEN status IN ('scheduled', 'active') THEN 0 ELSE 1 END,
           CASE WHEN status IN ('scheduled', 'active') THEN start_ts ELSE -start_ts END
         LIMIT 1
       )
       LEFT JOIN recurrence_rules r ON r.event_id = e.event_id
       WHERE g.user_id = ?1
         AND (?2 IS NULL OR e.title LIKE ?2 OR e.location LIKE ?2)
         AND (?3 IS NULL OR o.status = ?3)
         AND (?4 IS NULL OR g.level = ?4)
       ORDER BY {order} {direction}, e.event_id {direction}
       LIMIT ?5 OFFSET ?6"
    );

    let rows: Vec<(EventInfo, String, RawOccurrence, Option<RecurrenceRule>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![user_id, text, status, level, limit, offset], |row| {
            let info = EventInfo {
              event_id:    row.get(0)?,
              title:       row.get(1)?,
              description: row.get(2)?,
              location:    row.get(3)?,
              version:     row.get(4)?,
            };
            let duration: Option<i64> = row.get(15)?;
            let rule = match duration {
              Some(duration) => Some(RecurrenceRule {
                pattern: RecurrencePattern {
                  hour:  row.get(11)?,
                  day:   row.get(12)?,
                  month: row.get(13)?,
                  year:  row.get(14)?,
                },
                duration,
              }),
              None => None,
            };
            Ok((info, row.get(5)?, RawOccurrence::read(row, 6)?, rule))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(info, level, occurrence, recurrence)| {
        Ok(EventSummary {
          record: EventRecord { info, recurrence, occurrence: occurrence.into_occurrence()? },
          level:  decode_level(&level)?,
        })
      })
      .collect()
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn change_log(&self, event_id: EventId, after_version: i64) -> Result<Vec<ChangeLogEntry>> {
    Ok(
      self
        .conn
        .call(move |conn| read_change_log(conn, event_id, after_version))
        .await?,
    )
  }

  async fn rollback(&self, event_id: EventId, target: i64) -> Result<RollbackOutcome> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let record = require_record(&tx, event_id)?;
        let entries = read_change_log(&tx, event_id, target)?;
        let plan = history::plan_rollback(
          &record.state(),
          record.occurrence.occurrence_id,
          &entries,
          target,
        )
        .map_err(abort)?;

        write_state(&tx, &record, &plan.state)?;
        let discarded = tx.execute(
          "DELETE FROM change_log WHERE event_id = ?1 AND version > ?2",
          params![event_id, target],
        )?;
        tx.commit()?;

        Ok(RollbackOutcome { version: target, restored: plan.restored, discarded })
      })
      .await?;
    debug!(event_id, version = target, discarded = outcome.discarded, "event rolled back");
    Ok(outcome)
  }

  // ── Access ────────────────────────────────────────────────────────────────

  async fn get_grant(&self, event_id: EventId, user_id: UserId) -> Result<Option<AccessGrant>> {
    Ok(
      self
        .conn
        .call(move |conn| read_grant(conn, event_id, user_id))
        .await?,
    )
  }

  async fn list_grants(&self, event_id: EventId) -> Result<Vec<AccessGrant>> {
    Ok(self.conn.call(move |conn| read_grants(conn, event_id)).await?)
  }

  async fn share(
    &self,
    event_id: EventId,
    actor: UserId,
    targets: Vec<ShareTarget>,
  ) -> Result<Vec<AccessGrant>> {
    let grants = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !event_exists(&tx, event_id)? {
          return Err(not_found(format!("event {event_id}")));
        }
        let existing = read_grants(&tx, event_id)?;
        access::check_share(actor, &targets, &existing).map_err(abort)?;

        for target in &targets {
          if !user_exists(&tx, target.user_id)? {
            return Err(abort(CoreError::validation(format!(
              "user {} does not exist",
              target.user_id
            ))));
          }
        }

        for target in &targets {
          tx.execute(
            "INSERT INTO access_grants (user_id, event_id, level) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, event_id) DO UPDATE SET level = excluded.level",
            params![target.user_id, event_id, encode_level(target.level)],
          )?;
        }

        let grants = read_grants(&tx, event_id)?;
        tx.commit()?;
        Ok(grants)
      })
      .await?;
    Ok(grants)
  }

  async fn remove_grant(&self, event_id: EventId, actor: UserId, user_id: UserId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let grant = read_grant(&tx, event_id, user_id)?;
        access::check_removal(actor, user_id, grant.as_ref()).map_err(abort)?;
        tx.execute(
          "DELETE FROM access_grants WHERE event_id = ?1 AND user_id = ?2",
          params![event_id, user_id],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Occurrences ───────────────────────────────────────────────────────────

  async fn list_occurrences(&self, event_id: EventId) -> Result<Vec<Occurrence>> {
    let sql = format!(
      "SELECT {OCCURRENCE_COLUMNS} FROM occurrences WHERE event_id = ?1 ORDER BY start_ts"
    );
    Ok(
      self
        .conn
        .call(move |conn| read_occurrences(conn, &sql, params![event_id]))
        .await?,
    )
  }

  async fn occurrences_in_window(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Occurrence>> {
    let (from, to) = (encode_ts(from), encode_ts(to));
    let sql = format!(
      "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
       WHERE (status = 'scheduled' AND start_ts BETWEEN ?1 AND ?2)
          OR (status = 'active' AND end_ts BETWEEN ?1 AND ?2)
       ORDER BY start_ts, occurrence_id"
    );
    Ok(
      self
        .conn
        .call(move |conn| read_occurrences(conn, &sql, params![from, to]))
        .await?,
    )
  }

  async fn activate_due(
    &self,
    event_id: EventId,
    as_of: DateTime<Utc>,
  ) -> Result<Option<Activation>> {
    let as_of = encode_ts(as_of);
    let sql = format!(
      "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
       WHERE event_id = ?1 AND status = 'scheduled' AND start_ts <= ?2
       ORDER BY start_ts LIMIT 1"
    );

    let activation = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut occurrence) = read_occurrences(&tx, &sql, params![event_id, as_of])?
          .into_iter()
          .next()
        else {
          return Ok(None);
        };
        set_status(&tx, &mut occurrence, OccurrenceStatus::Active)?;

        let mut next = None;
        let following = match read_rule(&tx, event_id)? {
          Some(rule) => match rule.next_after(occurrence.start_time) {
            Ok(times) => Some(times),
            Err(e) => {
              warn!(event_id, error = %e, "series cannot continue, no next occurrence");
              None
            }
          },
          None => None,
        };
        if let Some((start_time, end_time)) = following {
          let inserted = tx.execute(
            "INSERT INTO occurrences (event_id, start_ts, end_ts, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (event_id, start_ts) DO NOTHING",
            params![
              event_id,
              encode_ts(start_time),
              encode_ts(end_time),
              encode_status(OccurrenceStatus::Scheduled),
            ],
          )?;
          if inserted == 1 {
            next = Some(Occurrence {
              occurrence_id: tx.last_insert_rowid(),
              event_id,
              start_time,
              end_time,
              status: OccurrenceStatus::Scheduled,
            });
          }
        }

        tx.commit()?;
        Ok(Some(Activation { occurrence, next }))
      })
      .await?;
    Ok(activation)
  }

  async fn complete_due(
    &self,
    event_id: EventId,
    as_of: DateTime<Utc>,
  ) -> Result<Option<Occurrence>> {
    let as_of = encode_ts(as_of);
    let sql = format!(
      "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
       WHERE event_id = ?1 AND status = 'active' AND end_ts <= ?2
       ORDER BY start_ts LIMIT 1"
    );

    let completed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(mut occurrence) = read_occurrences(&tx, &sql, params![event_id, as_of])?
          .into_iter()
          .next()
        else {
          return Ok(None);
        };
        set_status(&tx, &mut occurrence, OccurrenceStatus::Completed)?;
        tx.commit()?;
        Ok(Some(occurrence))
      })
      .await?;
    Ok(completed)
  }

  async fn cancel_current(&self, event_id: EventId) -> Result<Occurrence> {
    let cancelled = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut occurrence = read_current(&tx, event_id)?
          .ok_or_else(|| not_found(format!("event {event_id}")))?;
        if !occurrence.status.can_transition_to(OccurrenceStatus::Cancelled) {
          return Err(abort(CoreError::validation(format!(
            "cannot cancel a {} event",
            occurrence.status
          ))));
        }
        set_status(&tx, &mut occurrence, OccurrenceStatus::Cancelled)?;
        tx.commit()?;
        Ok(occurrence)
      })
      .await?;
    Ok(cancelled)
  }
}
