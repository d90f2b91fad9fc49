//! SQL schema for the Rollcall SQLite store.
//!
//! Executed once at connection startup. Upgrades of older files are gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

-- Reference data. Owned by the surrounding application; read-only to the
-- alert pipeline.
CREATE TABLE IF NOT EXISTS students (
    student_id     TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    guardian_email TEXT
);

CREATE TABLE IF NOT EXISTS subjects (
    subject_id TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    teacher_id TEXT
);

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name    TEXT NOT NULL,
    email   TEXT NOT NULL,
    role    TEXT NOT NULL    -- 'admin' | 'teacher' | 'staff'
);

CREATE TABLE IF NOT EXISTS attendance (
    student_id TEXT NOT NULL,
    subject_id TEXT,
    date       TEXT NOT NULL,   -- YYYY-MM-DD
    presence   TEXT NOT NULL    -- 'present' | 'absent' | 'late' | 'excused'
);

-- Alerts are never deleted; acknowledgement closes them.
CREATE TABLE IF NOT EXISTS alerts (
    alert_id             TEXT PRIMARY KEY,
    alert_type           TEXT NOT NULL,
    severity             TEXT NOT NULL,
    student_id           TEXT NOT NULL,
    subject_id           TEXT,
    message              TEXT NOT NULL CHECK (length(message) <= 500),
    consecutive_days     INTEGER,
    attendance_rate      REAL,
    threshold            REAL,
    start_date           TEXT NOT NULL,
    end_date             TEXT NOT NULL,
    acknowledged_at      TEXT,
    acknowledged_by      TEXT,
    notification_sent_at TEXT,
    created_at           TEXT NOT NULL,
    notification_skipped_at TEXT,
    CHECK ((acknowledged_at IS NULL) = (acknowledged_by IS NULL)),
    CHECK (start_date <= end_date)
);

CREATE TABLE IF NOT EXISTS scheduled_emails (
    email_id     TEXT PRIMARY KEY,
    recipients   TEXT NOT NULL,   -- JSON array, ordered
    subject      TEXT NOT NULL,
    html         TEXT NOT NULL,
    text         TEXT,
    attachments  TEXT NOT NULL DEFAULT '[]',
    scheduled_at TEXT NOT NULL,
    status       TEXT NOT NULL,   -- 'pending' | 'in_flight' | 'sent' | 'failed' | 'cancelled'
    claimed_at   TEXT,
    claimed_by   TEXT,
    sent_at      TEXT,
    error        TEXT,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    max_retries  INTEGER NOT NULL DEFAULT 3,
    tags         TEXT NOT NULL DEFAULT '[]',
    created_by   TEXT,
    created_at   TEXT NOT NULL,
    CHECK (retry_count >= 0 AND retry_count <= max_retries),
    CHECK (status != 'sent' OR (sent_at IS NOT NULL AND error IS NULL))
);

-- One row per (email, tag); backs tag lookups and per-alert uniqueness.
CREATE TABLE IF NOT EXISTS email_tags (
    email_id TEXT NOT NULL REFERENCES scheduled_emails(email_id),
    tag      TEXT NOT NULL,
    PRIMARY KEY (email_id, tag)
);

CREATE TABLE IF NOT EXISTS unsubscribes (
    email           TEXT PRIMARY KEY,   -- normalised
    status          TEXT NOT NULL,      -- 'unsubscribed' | 'resubscribed'
    reason          TEXT,
    token           TEXT NOT NULL UNIQUE,
    unsubscribed_at TEXT NOT NULL,
    resubscribed_at TEXT
);

CREATE INDEX IF NOT EXISTS attendance_student_idx ON attendance(student_id, date);
CREATE INDEX IF NOT EXISTS alerts_open_idx
    ON alerts(student_id, alert_type) WHERE acknowledged_at IS NULL;
CREATE INDEX IF NOT EXISTS emails_due_idx ON scheduled_emails(status, scheduled_at);
CREATE INDEX IF NOT EXISTS email_tags_tag_idx ON email_tags(tag);

";

/// Current value of `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

/// Upgrades keyed by the version they start from. A fresh file already has
/// the final shape, so these only run against files written by older builds.
pub const MIGRATIONS: &[(i64, &str)] =
  &[(1, "ALTER TABLE alerts ADD COLUMN notification_skipped_at TEXT;")];
