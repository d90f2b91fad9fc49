//! Explicit expansion of an alert's references for display.

use rollcall_core::{
  alert::Alert,
  directory::{Student, Subject, User},
  store::Directory,
};

use crate::{Error, Result};

/// An alert with its student, subject and acknowledging user resolved.
/// References the directory no longer knows come back as `None`.
#[derive(Debug, Clone)]
pub struct PopulatedAlert {
  pub alert:           Alert,
  pub student:         Option<Student>,
  pub subject:         Option<Subject>,
  pub acknowledged_by: Option<User>,
}

pub async fn populate_alert<D: Directory>(directory: &D, alert: Alert) -> Result<PopulatedAlert> {
  let student = directory.get_student(alert.student_id).await.map_err(Error::store)?;
  let subject = match alert.subject_id {
    Some(id) => directory.get_subject(id).await.map_err(Error::store)?,
    None => None,
  };
  let acknowledged_by = match &alert.acknowledgement {
    Some(ack) => directory.get_user(ack.by).await.map_err(Error::store)?,
    None => None,
  };
  Ok(PopulatedAlert { alert, student, subject, acknowledged_by })
}
