//! Email-notification trigger: the forum mails the course address whenever a
//! thread changes, and the mail's headers name both the course and the thread.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::bridge::ThreadEvent;

static CONTENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<?([a-z0-9]{12,14})(?:_\d+)?@").expect("static regex"));

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonHeaders {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    pub common_headers: CommonHeaders,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SesNotification {
    pub mail: Mail,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SesRecord {
    pub ses: SesNotification,
}

/// Inbound mail event as delivered by the mail receiving service.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MailEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SesRecord>,
}

/// Content id embedded at the front of a notification's Message-ID.
pub fn content_id(message_id: &str) -> Option<&str> {
    CONTENT_ID.captures(message_id).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Course named by the local part of a recipient address.
pub fn course(recipient: &str) -> Option<&str> {
    let address = match (recipient.rfind('<'), recipient.rfind('>')) {
        (Some(open), Some(close)) if open < close => &recipient[open + 1..close],
        _ => recipient,
    };
    address.trim().split('@').next().filter(|local| !local.is_empty())
}

impl MailEvent {
    /// `None` when the mail is not a thread notification.
    pub fn thread_event(&self) -> Option<ThreadEvent> {
        let headers = &self.records.first()?.ses.mail.common_headers;
        let cid = content_id(&headers.message_id)?;
        let course = course(headers.to.first()?)?;
        Some(ThreadEvent { course: course.to_string(), cid: cid.to_string() })
    }
}
