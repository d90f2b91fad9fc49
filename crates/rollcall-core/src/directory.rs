//! Reference entities owned by the surrounding application.
//!
//! The pipeline only ever reads these; resolving an id into an entity is an
//! explicit [`Directory`](crate::store::Directory) lookup.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
  pub student_id:     Uuid,
  pub name:           String,
  pub guardian_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id: Uuid,
  pub name:       String,
  pub teacher_id: Option<Uuid>,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserRole {
  Admin,
  Teacher,
  Staff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub user_id: Uuid,
  pub name:    String,
  pub email:   String,
  pub role:    UserRole,
}
