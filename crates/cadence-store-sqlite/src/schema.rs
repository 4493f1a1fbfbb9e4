//! SQL schema for the Cadence SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY,
    email       TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_info (
    event_id     INTEGER PRIMARY KEY,
    title        TEXT NOT NULL,
    description  TEXT,
    location     TEXT,
    version      INTEGER NOT NULL DEFAULT 1,
    CHECK (version >= 1)
);

-- Times are UNIX epoch seconds.
CREATE TABLE IF NOT EXISTS occurrences (
    occurrence_id  INTEGER PRIMARY KEY,
    event_id       INTEGER NOT NULL REFERENCES event_info(event_id),
    start_ts       INTEGER NOT NULL,
    end_ts         INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'scheduled', -- 'scheduled' | 'active' | 'completed' | 'cancelled'
    UNIQUE (event_id, start_ts),
    CHECK  (end_ts > start_ts)
);

CREATE TABLE IF NOT EXISTS recurrence_rules (
    event_id  INTEGER PRIMARY KEY REFERENCES event_info(event_id),
    hour      INTEGER NOT NULL DEFAULT 0,
    day       INTEGER NOT NULL DEFAULT 0,
    month     INTEGER NOT NULL DEFAULT 0,
    year      INTEGER NOT NULL DEFAULT 0,
    duration  INTEGER NOT NULL,
    CHECK (duration > 0)
);

CREATE TABLE IF NOT EXISTS access_grants (
    grant_id  INTEGER PRIMARY KEY,
    user_id   INTEGER NOT NULL REFERENCES users(user_id),
    event_id  INTEGER NOT NULL REFERENCES event_info(event_id),
    level     TEXT NOT NULL, -- 'read' | 'write' | 'owner'
    UNIQUE (user_id, event_id)
);

-- Append-only, except that a rollback deletes the rows past its target.
CREATE TABLE IF NOT EXISTS change_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id    INTEGER NOT NULL REFERENCES event_info(event_id),
    version     INTEGER NOT NULL,
    field_name  TEXT NOT NULL,
    old_val     TEXT,
    new_val     TEXT,
    changed_at  TEXT NOT NULL,
    -- Set for start/end time changes: the occurrence they were made on.
    occurrence_id INTEGER
);

-- Durable signal log. Offsets are global and strictly increasing.
CREATE TABLE IF NOT EXISTS signals (
    signal_offset  INTEGER PRIMARY KEY AUTOINCREMENT,
    topic          TEXT NOT NULL,
    payload        TEXT NOT NULL,   -- JSON {event_id, topic}
    emitted_at     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    group_name   TEXT NOT NULL,
    topic        TEXT NOT NULL,
    next_offset  INTEGER NOT NULL,
    PRIMARY KEY (group_name, topic)
);

CREATE INDEX IF NOT EXISTS occurrences_start_idx  ON occurrences(start_ts);
CREATE INDEX IF NOT EXISTS occurrences_end_idx    ON occurrences(end_ts);
CREATE INDEX IF NOT EXISTS grants_event_idx       ON access_grants(event_id);
CREATE INDEX IF NOT EXISTS change_log_event_idx   ON change_log(event_id, version);
CREATE INDEX IF NOT EXISTS signals_topic_idx      ON signals(topic, signal_offset);

PRAGMA user_version = 1;
";
