//! [`SqliteStore`]: the SQLite implementation of every Rollcall repository.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use rollcall_core::{
  alert::{Acknowledgement, Alert, AlertInsert, NewAlert},
  attendance::{AttendanceRecord, DateWindow},
  directory::{Student, Subject, User},
  email::{
    CancelOutcome, Claim, EmailStatus, EnqueueOutcome, NewScheduledEmail, Resolution,
    ScheduledEmail,
  },
  store::{AlertStore, AttendanceReader, Directory, EmailQueue, UnsubscribeStore},
  unsubscribe::{Unsubscribe, UnsubscribeStatus},
};

use crate::{
  Result,
  encode::{
    ALERT_COLUMNS, EMAIL_COLUMNS, RawAlert, RawAttendance, RawEmail, RawStudent, RawSubject,
    RawUnsubscribe, RawUser, UNSUBSCRIBE_COLUMNS, decode_uuid, encode_attachments, encode_date,
    encode_dt, encode_strings, encode_uuid,
  },
  schema::{MIGRATIONS, SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Rollcall store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
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

  /// Open an in-memory store, for tests.
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
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        if version > 0 {
          for (from, sql) in MIGRATIONS.iter().filter(|(from, _)| *from >= version) {
            tracing::info!(from, "migrating store schema");
            conn.execute_batch(sql)?;
          }
        }
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reference data writes ─────────────────────────────────────────────────
  //
  // Not part of any repository trait: the pipeline never writes reference
  // data. These exist for the owning application, seeding and tests.

  pub async fn insert_student(&self, student: &Student) -> Result<()> {
    let id    = encode_uuid(student.student_id);
    let name  = student.name.clone();
    let email = student.guardian_email.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO students (student_id, name, guardian_email) VALUES (?1, ?2, ?3)",
          rusqlite::params![id, name, email],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn insert_subject(&self, subject: &Subject) -> Result<()> {
    let id      = encode_uuid(subject.subject_id);
    let name    = subject.name.clone();
    let teacher = subject.teacher_id.map(encode_uuid);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (subject_id, name, teacher_id) VALUES (?1, ?2, ?3)",
          rusqlite::params![id, name, teacher],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn insert_user(&self, user: &User) -> Result<()> {
    let id    = encode_uuid(user.user_id);
    let name  = user.name.clone();
    let email = user.email.clone();
    let role  = user.role.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, name, email, role) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id, name, email, role],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn record_attendance(&self, records: &[AttendanceRecord]) -> Result<()> {
    let rows: Vec<(String, Option<String>, String, String)> = records
      .iter()
      .map(|r| {
        (
          encode_uuid(r.student_id),
          r.subject_id.map(encode_uuid),
          encode_date(r.date),
          r.presence.as_ref().to_owned(),
        )
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO attendance (student_id, subject_id, date, presence)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (student, subject, date, presence) in &rows {
            stmt.execute(rusqlite::params![student, subject, date, presence])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_email(&self, id: Uuid) -> Result<Option<ScheduledEmail>> {
    let id_str = encode_uuid(id);
    let raw = self.conn.call(move |conn| Ok(select_email(conn, &id_str)?)).await?;
    raw.map(RawEmail::into_email).transpose()
  }
}

fn select_alert(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawAlert>> {
  conn
    .query_row(
      &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
      rusqlite::params![id],
      RawAlert::from_row,
    )
    .optional()
}

fn select_email(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawEmail>> {
  conn
    .query_row(
      &format!("SELECT {EMAIL_COLUMNS} FROM scheduled_emails e WHERE e.email_id = ?1"),
      rusqlite::params![id],
      RawEmail::from_row,
    )
    .optional()
}

fn select_unsubscribe(
  conn: &rusqlite::Connection,
  column: &str,
  value: &str,
) -> rusqlite::Result<Option<RawUnsubscribe>> {
  conn
    .query_row(
      &format!("SELECT {UNSUBSCRIBE_COLUMNS} FROM unsubscribes WHERE {column} = ?1"),
      rusqlite::params![value],
      RawUnsubscribe::from_row,
    )
    .optional()
}

// ─── Reference data reads ────────────────────────────────────────────────────

impl AttendanceReader for SqliteStore {
  type Error = crate::Error;

  async fn get_attendance(
    &self,
    student_id: Uuid,
    subject_id: Option<Uuid>,
    window: DateWindow,
  ) -> Result<Vec<AttendanceRecord>> {
    let student_str = encode_uuid(student_id);
    let subject_str = subject_id.map(encode_uuid);
    let start_str   = encode_date(window.start);
    let end_str     = encode_date(window.end);

    let raws: Vec<RawAttendance> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(subject) = subject_str {
          let mut stmt = conn.prepare(
            "SELECT student_id, subject_id, date, presence FROM attendance
             WHERE student_id = ?1 AND subject_id = ?2 AND date BETWEEN ?3 AND ?4
             ORDER BY date",
          )?;
          stmt
            .query_map(
              rusqlite::params![student_str, subject, start_str, end_str],
              RawAttendance::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(
            "SELECT student_id, subject_id, date, presence FROM attendance
             WHERE student_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date",
          )?;
          stmt
            .query_map(
              rusqlite::params![student_str, start_str, end_str],
              RawAttendance::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAttendance::into_record).collect()
  }
}

impl Directory for SqliteStore {
  type Error = crate::Error;

  async fn get_student(&self, id: Uuid) -> Result<Option<Student>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawStudent> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT student_id, name, guardian_email FROM students WHERE student_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawStudent {
                  student_id:     row.get(0)?,
                  name:           row.get(1)?,
                  guardian_email: row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawStudent::into_student).transpose()
  }

  async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSubject> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT subject_id, name, teacher_id FROM subjects WHERE subject_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawSubject {
                  subject_id: row.get(0)?,
                  name:       row.get(1)?,
                  teacher_id: row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }

  async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, name, email, role FROM users WHERE user_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawUser {
                  user_id: row.get(0)?,
                  name:    row.get(1)?,
                  email:   row.get(2)?,
                  role:    row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }
}

// ─── AlertStore impl ─────────────────────────────────────────────────────────

impl AlertStore for SqliteStore {
  type Error = crate::Error;

  async fn insert_unless_duplicate(&self, input: NewAlert) -> Result<AlertInsert> {
    input.validate()?;
    let alert = input.into_alert(Uuid::new_v4(), Utc::now());

    let id_str      = encode_uuid(alert.alert_id);
    let type_str    = alert.alert_type.as_ref().to_owned();
    let severity    = alert.severity.as_ref().to_owned();
    let student_str = encode_uuid(alert.student_id);
    let subject_str = alert.subject_id.map(encode_uuid);
    let message     = alert.message.clone();
    let days        = alert.details.consecutive_days.map(i64::from);
    let rate        = alert.details.attendance_rate;
    let threshold   = alert.details.threshold;
    let start_str   = encode_date(alert.details.start_date);
    let end_str     = encode_date(alert.details.end_date);
    let created_str = encode_dt(alert.created_at);

    let existing: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
          .query_row(
            &format!(
              "SELECT {ALERT_COLUMNS} FROM alerts
               WHERE student_id = ?1 AND alert_type = ?2
                 AND acknowledged_at IS NULL
                 AND start_date <= ?4 AND ?3 <= end_date
               ORDER BY created_at
               LIMIT 1"
            ),
            rusqlite::params![student_str, type_str, start_str, end_str],
            RawAlert::from_row,
          )
          .optional()?;

        if existing.is_some() {
          return Ok(existing);
        }

        tx.execute(
          "INSERT INTO alerts (
             alert_id, alert_type, severity, student_id, subject_id, message,
             consecutive_days, attendance_rate, threshold, start_date, end_date,
             created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            id_str,
            type_str,
            severity,
            student_str,
            subject_str,
            message,
            days,
            rate,
            threshold,
            start_str,
            end_str,
            created_str,
          ],
        )?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match existing {
      Some(raw) => Ok(AlertInsert::Duplicate(raw.into_alert()?)),
      None => Ok(AlertInsert::Created(alert)),
    }
  }

  async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
    let id_str = encode_uuid(id);
    let raw = self.conn.call(move |conn| Ok(select_alert(conn, &id_str)?)).await?;
    raw.map(RawAlert::into_alert).transpose()
  }

  async fn acknowledge(&self, id: Uuid, ack: Acknowledgement) -> Result<Option<Alert>> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(ack.at);
    let by_str = encode_uuid(ack.by);

    let raw = self
      .conn
      .call(move |conn| {
        // Both columns in one statement; the guard keeps the first
        // acknowledgement.
        conn.execute(
          "UPDATE alerts SET acknowledged_at = ?2, acknowledged_by = ?3
           WHERE alert_id = ?1 AND acknowledged_at IS NULL",
          rusqlite::params![id_str, at_str, by_str],
        )?;
        Ok(select_alert(conn, &id_str)?)
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }

  async fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE alerts SET notification_sent_at = ?2
           WHERE alert_id = ?1 AND notification_sent_at IS NULL",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn mark_notification_skipped(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE alerts SET notification_skipped_at = ?2
           WHERE alert_id = ?1
             AND notification_sent_at IS NULL
             AND notification_skipped_at IS NULL",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn list_unnotified(&self, limit: usize) -> Result<Vec<Alert>> {
    let limit_val = limit as i64;

    let raws: Vec<RawAlert> = self
      .conn
      .call(move |conn| {
        // Alert tags are `alert:<hyphenated uuid>`, matching `encode_uuid`.
        let mut stmt = conn.prepare(&format!(
          "SELECT {ALERT_COLUMNS} FROM alerts a
           WHERE a.acknowledged_at IS NULL
             AND a.notification_sent_at IS NULL
             AND a.notification_skipped_at IS NULL
             AND NOT EXISTS (
               SELECT 1 FROM email_tags t WHERE t.tag = 'alert:' || a.alert_id
             )
           ORDER BY a.created_at
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], RawAlert::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAlert::into_alert).collect()
  }
}

// ─── EmailQueue impl ─────────────────────────────────────────────────────────

impl EmailQueue for SqliteStore {
  type Error = crate::Error;

  async fn enqueue(
    &self,
    mut input: NewScheduledEmail,
    unique_tag: Option<String>,
  ) -> Result<EnqueueOutcome> {
    input.validate()?;
    if let Some(tag) = &unique_tag
      && !input.tags.contains(tag)
    {
      input.tags.push(tag.clone());
    }
    let email = input.into_email(Uuid::new_v4(), Utc::now());

    let id_str          = encode_uuid(email.email_id);
    let recipients_str  = encode_strings(&email.to)?;
    let subject         = email.subject.clone();
    let html            = email.html.clone();
    let text            = email.text.clone();
    let attachments_str = encode_attachments(&email.attachments)?;
    let scheduled_str   = encode_dt(email.scheduled_at);
    let status_str      = email.status.as_ref().to_owned();
    let max_retries     = i64::from(email.max_retries);
    let tags            = email.tags.clone();
    let tags_str        = encode_strings(&email.tags)?;
    let created_by_str  = email.created_by.map(encode_uuid);
    let created_str     = encode_dt(email.created_at);

    let existing: Option<RawEmail> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(tag) = unique_tag {
          let existing = tx
            .query_row(
              &format!(
                "SELECT {EMAIL_COLUMNS} FROM scheduled_emails e
                 JOIN email_tags t ON t.email_id = e.email_id
                 WHERE t.tag = ?1
                 ORDER BY e.created_at
                 LIMIT 1"
              ),
              rusqlite::params![tag],
              RawEmail::from_row,
            )
            .optional()?;
          if existing.is_some() {
            return Ok(existing);
          }
        }

        tx.execute(
          "INSERT INTO scheduled_emails (
             email_id, recipients, subject, html, text, attachments,
             scheduled_at, status, retry_count, max_retries, tags,
             created_by, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            id_str,
            recipients_str,
            subject,
            html,
            text,
            attachments_str,
            scheduled_str,
            status_str,
            max_retries,
            tags_str,
            created_by_str,
            created_str,
          ],
        )?;
        {
          let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO email_tags (email_id, tag) VALUES (?1, ?2)")?;
          for tag in &tags {
            stmt.execute(rusqlite::params![id_str, tag])?;
          }
        }
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match existing {
      Some(raw) => Ok(EnqueueOutcome::Existing(raw.into_email()?)),
      None => Ok(EnqueueOutcome::Created(email)),
    }
  }

  async fn get_email(&self, id: Uuid) -> Result<Option<ScheduledEmail>> { self.query_email(id).await }

  async fn find_by_tag(&self, tag: &str) -> Result<Vec<ScheduledEmail>> {
    let tag = tag.to_owned();

    let raws: Vec<RawEmail> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EMAIL_COLUMNS} FROM scheduled_emails e
           JOIN email_tags t ON t.email_id = e.email_id
           WHERE t.tag = ?1
           ORDER BY e.created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![tag], RawEmail::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEmail::into_email).collect()
  }

  async fn due_ids(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
    let now_str   = encode_dt(now);
    let limit_val = limit as i64;

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT email_id FROM scheduled_emails
           WHERE status = 'pending' AND scheduled_at <= ?1
           ORDER BY scheduled_at, created_at
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![now_str, limit_val], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn try_claim(&self, id: Uuid, claim: Claim) -> Result<Option<ScheduledEmail>> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(claim.at);
    let by     = claim.by;

    let raw = self
      .conn
      .call(move |conn| {
        // The WHERE clause is the claim's precondition: whoever flips the row
        // out of 'pending' first wins; everyone else updates zero rows.
        let won = conn.execute(
          "UPDATE scheduled_emails
           SET status = 'in_flight', claimed_at = ?2, claimed_by = ?3
           WHERE email_id = ?1 AND status = 'pending' AND scheduled_at <= ?2",
          rusqlite::params![id_str, at_str, by],
        )?;
        if won == 0 {
          return Ok(None);
        }
        Ok(select_email(conn, &id_str)?)
      })
      .await?;

    raw.map(RawEmail::into_email).transpose()
  }

  async fn resolve(&self, id: Uuid, resolution: Resolution) -> Result<Option<ScheduledEmail>> {
    let id_str = encode_uuid(id);

    let raw = self
      .conn
      .call(move |conn| {
        let changed = match resolution {
          Resolution::Sent { at } => conn.execute(
            "UPDATE scheduled_emails
             SET status = 'sent', sent_at = ?2, error = NULL,
                 claimed_at = NULL, claimed_by = NULL
             WHERE email_id = ?1 AND status = 'in_flight'",
            rusqlite::params![id_str, encode_dt(at)],
          )?,
          Resolution::Retry { retry_count, next_attempt_at, error } => conn.execute(
            "UPDATE scheduled_emails
             SET status = 'pending', retry_count = ?2, scheduled_at = ?3, error = ?4,
                 claimed_at = NULL, claimed_by = NULL
             WHERE email_id = ?1 AND status = 'in_flight'",
            rusqlite::params![id_str, i64::from(retry_count), encode_dt(next_attempt_at), error],
          )?,
          Resolution::Failed { retry_count, error } => conn.execute(
            "UPDATE scheduled_emails
             SET status = 'failed', retry_count = ?2, error = ?3,
                 claimed_at = NULL, claimed_by = NULL
             WHERE email_id = ?1 AND status = 'in_flight'",
            rusqlite::params![id_str, i64::from(retry_count), error],
          )?,
          Resolution::Release => conn.execute(
            "UPDATE scheduled_emails
             SET status = 'pending', claimed_at = NULL, claimed_by = NULL
             WHERE email_id = ?1 AND status = 'in_flight'",
            rusqlite::params![id_str],
          )?,
        };
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_email(conn, &id_str)?)
      })
      .await?;

    raw.map(RawEmail::into_email).transpose()
  }

  async fn cancel(&self, id: Uuid) -> Result<Option<CancelOutcome>> {
    let id_str = encode_uuid(id);

    let outcome: Option<(bool, RawEmail)> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE scheduled_emails SET status = 'cancelled'
           WHERE email_id = ?1 AND status = 'pending'",
          rusqlite::params![id_str],
        )?;
        Ok(select_email(conn, &id_str)?.map(|raw| (changed == 1, raw)))
      })
      .await?;

    outcome
      .map(|(cancelled, raw)| {
        let email = raw.into_email()?;
        debug_assert!(!cancelled || email.status == EmailStatus::Cancelled);
        Ok(if cancelled {
          CancelOutcome::Cancelled(email)
        } else {
          CancelOutcome::NotPending(email)
        })
      })
      .transpose()
  }
}

// ─── UnsubscribeStore impl ───────────────────────────────────────────────────

impl UnsubscribeStore for SqliteStore {
  type Error = crate::Error;

  async fn get_unsubscribe(&self, email: &str) -> Result<Option<Unsubscribe>> {
    let email = email.to_owned();
    let raw = self
      .conn
      .call(move |conn| Ok(select_unsubscribe(conn, "email", &email)?))
      .await?;
    raw.map(RawUnsubscribe::into_unsubscribe).transpose()
  }

  async fn record_unsubscribe(&self, fresh: Unsubscribe) -> Result<Unsubscribe> {
    let email      = fresh.email.clone();
    let reason     = fresh.reason.clone();
    let token      = fresh.token.clone();
    let at_str     = encode_dt(fresh.unsubscribed_at);
    let status_str = UnsubscribeStatus::Unsubscribed.as_ref().to_owned();

    let raw: Option<RawUnsubscribe> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match select_unsubscribe(&tx, "email", &email)? {
          None => {
            tx.execute(
              "INSERT INTO unsubscribes (email, status, reason, token, unsubscribed_at)
               VALUES (?1, ?2, ?3, ?4, ?5)",
              rusqlite::params![email, status_str, reason, token, at_str],
            )?;
          }
          Some(existing) if existing.status == status_str => {
            return Ok(Some(existing));
          }
          Some(_) => {
            // Tokens are immutable.
            tx.execute(
              "UPDATE unsubscribes
               SET status = ?2, reason = COALESCE(?3, reason),
                   unsubscribed_at = ?4, resubscribed_at = NULL
               WHERE email = ?1",
              rusqlite::params![email, status_str, reason, at_str],
            )?;
          }
        }

        let stored = select_unsubscribe(&tx, "email", &email)?;
        tx.commit()?;
        Ok(stored)
      })
      .await?;

    match raw {
      Some(raw) => raw.into_unsubscribe(),
      None => Ok(fresh),
    }
  }

  async fn resubscribe(&self, token: &str, at: DateTime<Utc>) -> Result<Option<Unsubscribe>> {
    let token  = token.to_owned();
    let at_str = encode_dt(at);

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE unsubscribes SET status = 'resubscribed', resubscribed_at = ?2
           WHERE token = ?1 AND status = 'unsubscribed'",
          rusqlite::params![token, at_str],
        )?;
        Ok(select_unsubscribe(conn, "token", &token)?)
      })
      .await?;

    raw.map(RawUnsubscribe::into_unsubscribe).transpose()
  }
}
