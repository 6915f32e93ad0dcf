use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Opaque forum author identifier. The forum sends these either as JSON
/// numbers or strings; both normalise to the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        AuthorId(id.into())
    }

    /// Anonymous posts carry no id at all.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AuthorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
            Null(()),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => AuthorId(s),
            Raw::Num(n) => AuthorId(n.to_string()),
            Raw::Null(()) => AuthorId::default(),
        })
    }
}

// ---------------- forum wire shapes (`content.get`) ----------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    #[serde(default)]
    pub uid: AuthorId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawReply {
    #[serde(default)]
    pub uid: AuthorId,
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawChild {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub history: Vec<Revision>,
    #[serde(default)]
    pub uid: AuthorId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub children: Vec<RawReply>,
}

/// A forum thread exactly as `content.get` returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawThread {
    pub id: String,
    pub nr: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub history: Vec<Revision>,
    #[serde(default)]
    pub children: Vec<RawChild>,
}

// ---------------- classified thread ----------------

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub author: AuthorId,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Followup {
    pub author: AuthorId,
    pub subject: String,
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    StudentAnswer(Vec<Revision>),
    InstructorAnswer(Vec<Revision>),
    Followup(Followup),
}

impl Child {
    /// `None` for child kinds the bridge does not render.
    fn classify(raw: RawChild) -> Option<Self> {
        match raw.kind.as_str() {
            "s_answer" => Some(Child::StudentAnswer(raw.history)),
            "i_answer" => Some(Child::InstructorAnswer(raw.history)),
            "followup" => Some(Child::Followup(Followup {
                author: raw.uid,
                subject: raw.subject,
                replies: raw
                    .children
                    .into_iter()
                    .map(|r| Reply { author: r.uid, subject: r.subject })
                    .collect(),
            })),
            _ => None,
        }
    }
}

/// Thread split into the four groups the renderer consumes.
/// Revision lists are most-recent first, as the forum sends them.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub content_id: String,
    pub number: i64,
    pub private: bool,
    pub root: Vec<Revision>,
    pub student_answer: Option<Vec<Revision>>,
    pub instructor_answer: Option<Vec<Revision>>,
    pub followups: Vec<Followup>,
}

impl From<RawThread> for Thread {
    fn from(raw: RawThread) -> Self {
        let mut thread = Thread {
            content_id: raw.id,
            number: raw.nr,
            private: raw.status == "private",
            root: raw.history,
            student_answer: None,
            instructor_answer: None,
            followups: Vec::new(),
        };
        for child in raw.children.into_iter().filter_map(Child::classify) {
            match child {
                Child::StudentAnswer(h) if thread.student_answer.is_none() => thread.student_answer = Some(h),
                Child::InstructorAnswer(h) if thread.instructor_answer.is_none() => thread.instructor_answer = Some(h),
                Child::Followup(f) => thread.followups.push(f),
                _ => tracing::warn!(cid = %thread.content_id, "ignoring duplicate answer block"),
            }
        }
        thread
    }
}

impl Thread {
    /// Every author id appearing anywhere in the thread, anonymous ones excluded.
    pub fn author_ids(&self) -> Vec<AuthorId> {
        let answers = self.student_answer.iter().chain(self.instructor_answer.iter()).flatten();
        let followups = self.followups.iter().flat_map(|f| {
            std::iter::once(&f.author).chain(f.replies.iter().map(|r| &r.author))
        });
        let mut ids: Vec<AuthorId> = self
            .root
            .iter()
            .chain(answers)
            .map(|r| &r.uid)
            .chain(followups)
            .filter(|id| !id.is_anonymous())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ---------------- authors ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Other,
}

impl Role {
    pub fn from_forum(role: &str) -> Self {
        match role {
            "student" => Role::Student,
            "instructor" | "professor" | "ta" => Role::Instructor,
            _ => Role::Other,
        }
    }
}

/// `network.get_users` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForumUser {
    pub id: AuthorId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    Known { id: AuthorId, display: String, role: Role, link: Option<String> },
    Unknown,
}

impl Author {
    pub fn is_student(&self) -> bool {
        matches!(self, Author::Known { role: Role::Student, .. })
    }
}

// ---------------- chat ----------------

/// One chat attachment. Field names match the chat platform's attachment
/// object so a `Vec<MessageSegment>` serialises straight into the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageSegment {
    pub fallback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub text: String,
}

/// Where and as whom a tenant's messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub token: String,
    pub channel: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Posted,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(children: serde_json::Value) -> RawThread {
        serde_json::from_value(json!({
            "id": "abc123",
            "nr": 3,
            "status": "private",
            "history": [{ "uid": null, "subject": "Q", "content": "" }],
            "children": children
        }))
        .unwrap()
    }

    #[test]
    fn author_ids_accept_numbers_strings_and_null() {
        let ids: Vec<AuthorId> = serde_json::from_value(json!([7, "hx9", null])).unwrap();
        assert_eq!(ids, vec![AuthorId::new("7"), AuthorId::new("hx9"), AuthorId::default()]);
        assert!(ids[2].is_anonymous());
    }

    #[test]
    fn first_answer_of_each_kind_wins() {
        let thread = Thread::from(raw(json!([
            { "type": "i_answer", "history": [{ "uid": "i1", "content": "first" }] },
            { "type": "i_answer", "history": [{ "uid": "i2", "content": "second" }] },
            { "type": "note", "uid": "x" },
            { "type": "followup", "uid": 5, "subject": "f", "children": [{ "uid": null, "subject": "r" }] }
        ])));
        assert!(thread.private);
        assert!(thread.student_answer.is_none());
        assert_eq!(thread.instructor_answer.as_ref().unwrap()[0].content, "first");
        assert_eq!(thread.followups.len(), 1);
        assert!(thread.followups[0].replies[0].author.is_anonymous());
        // the anonymous root and reply are left out
        assert_eq!(thread.author_ids(), vec![AuthorId::new("5"), AuthorId::new("i1")]);
    }

    #[test]
    fn forum_roles() {
        assert_eq!(Role::from_forum("ta"), Role::Instructor);
        assert_eq!(Role::from_forum("student"), Role::Student);
        assert_eq!(Role::from_forum("admin"), Role::Other);
    }
}
