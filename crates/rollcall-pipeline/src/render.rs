//! Alert notification content, rendered with minijinja.
//!
//! Templates are registered once at construction. The `.html` name turns on
//! HTML auto-escaping, so names and messages taken from the directory cannot
//! inject markup.

use minijinja::Environment;
use rollcall_core::{
  alert::{Alert, AlertType},
  directory::{Student, Subject},
};
use serde::Serialize;

use crate::Result;

const SUBJECT_TEMPLATE: &str = "\
{% if severity == 'critical' %}Urgent: {% endif %}{{ title }} for {{ student }}\
{% if subject %} ({{ subject }}){% endif %}";

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body>
<h2>{{ title }}</h2>
<p>{{ message }}</p>
<table>
<tr><th align="left">Student</th><td>{{ student }}</td></tr>
{%- if subject %}
<tr><th align="left">Subject</th><td>{{ subject }}</td></tr>
{%- endif %}
<tr><th align="left">Period</th><td>{{ start_date }} to {{ end_date }}</td></tr>
{%- if consecutive_days %}
<tr><th align="left">Consecutive absences</th><td>{{ consecutive_days }}</td></tr>
{%- endif %}
{%- if attendance_percent %}
<tr><th align="left">Attendance</th><td>{{ attendance_percent }}%</td></tr>
{%- endif %}
</table>
<p><small>You are receiving this because you are listed as a contact for {{ student }}.
Reply to the school office to stop attendance notifications.</small></p>
</body>
</html>
"#;

const TEXT_TEMPLATE: &str = "\
{{ title }}

{{ message }}

Student: {{ student }}
{% if subject %}Subject: {{ subject }}
{% endif %}Period: {{ start_date }} to {{ end_date }}
{% if consecutive_days %}Consecutive absences: {{ consecutive_days }}
{% endif %}{% if attendance_percent %}Attendance: {{ attendance_percent }}%
{% endif %}
You are receiving this because you are listed as a contact for {{ student }}.
Reply to the school office to stop attendance notifications.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
  pub subject: String,
  pub html:    String,
  pub text:    String,
}

#[derive(Serialize)]
struct AlertContext<'a> {
  title:              &'static str,
  severity:           &'a str,
  message:            &'a str,
  student:            &'a str,
  subject:            Option<&'a str>,
  start_date:         String,
  end_date:           String,
  consecutive_days:   Option<u32>,
  attendance_percent: Option<String>,
}

pub fn alert_title(alert_type: AlertType) -> &'static str {
  match alert_type {
    AlertType::ConsecutiveAbsence => "Consecutive absences",
    AlertType::LowAttendance => "Low attendance",
    AlertType::PatternWarning => "Recurring absences",
  }
}

#[derive(Debug)]
pub struct AlertRenderer {
  env: Environment<'static>,
}

impl AlertRenderer {
  pub fn new() -> Result<Self> {
    let mut env = Environment::new();
    env.add_template("subject.txt", SUBJECT_TEMPLATE)?;
    env.add_template("alert.html", HTML_TEMPLATE)?;
    env.add_template("alert.txt", TEXT_TEMPLATE)?;
    Ok(Self { env })
  }

  pub fn render(
    &self,
    alert: &Alert,
    student: &Student,
    subject: Option<&Subject>,
  ) -> Result<RenderedEmail> {
    let ctx = AlertContext {
      title:              alert_title(alert.alert_type),
      severity:           alert.severity.as_ref(),
      message:            &alert.message,
      student:            &student.name,
      subject:            subject.map(|s| s.name.as_str()),
      start_date:         alert.details.start_date.to_string(),
      end_date:           alert.details.end_date.to_string(),
      consecutive_days:   alert.details.consecutive_days,
      attendance_percent: alert.details.attendance_rate.map(|r| format!("{:.0}", r * 100.0)),
    };

    let subject_line = self.env.get_template("subject.txt")?.render(&ctx)?;
    Ok(RenderedEmail {
      // Header values must stay on one line.
      subject: subject_line.split_whitespace().collect::<Vec<_>>().join(" "),
      html:    self.env.get_template("alert.html")?.render(&ctx)?,
      text:    self.env.get_template("alert.txt")?.render(&ctx)?,
    })
  }
}
