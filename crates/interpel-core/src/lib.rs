//! Core domain model for interpel: inquiries, replies and new-answer events.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

pub const CRATE_NAME: &str = "interpel-core";

/// The two upstream inquiry categories. Persisted with the Sejm short tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InquiryKind {
    #[serde(rename = "INT")]
    Interpellation,
    #[serde(rename = "ZAP")]
    WrittenQuestion,
}

impl InquiryKind {
    pub const ALL: [InquiryKind; 2] = [InquiryKind::Interpellation, InquiryKind::WrittenQuestion];

    pub fn tag(self) -> &'static str {
        match self {
            InquiryKind::Interpellation => "INT",
            InquiryKind::WrittenQuestion => "ZAP",
        }
    }

    /// Path segment of the list endpoint serving this kind.
    pub fn endpoint(self) -> &'static str {
        match self {
            InquiryKind::Interpellation => "interpellations",
            InquiryKind::WrittenQuestion => "writtenQuestions",
        }
    }
}

impl fmt::Display for InquiryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which fields identify "the same inquiry" across two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyStrategy {
    #[default]
    #[serde(rename = "id_and_kind")]
    IdAndKind,
    #[serde(rename = "id")]
    IdOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InquiryKey {
    pub id: String,
    pub kind: Option<InquiryKind>,
}

impl fmt::Display for InquiryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{}_{}", self.id, kind),
            None => f.write_str(&self.id),
        }
    }
}

/// Navigable link of an inquiry. The API hands out `{href, rel}` objects;
/// older snapshots may carry a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Structured {
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rel: Option<String>,
    },
    Plain(String),
}

impl Link {
    pub fn href(&self) -> &str {
        match self {
            Link::Structured { href, .. } => href,
            Link::Plain(url) => url,
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Link::Plain(String::new())
    }
}

/// One government response entry attached to an inquiry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(rename = "prolongation", default, deserialize_with = "null_as_default")]
    pub is_prolongation: bool,
    #[serde(rename = "lastModified", default, deserialize_with = "null_as_default")]
    pub last_modified: String,
    #[serde(rename = "receiptDate", default, deserialize_with = "null_as_default")]
    pub receipt_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: String,
}

/// Canonical inquiry record; the unit persisted in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inquiry {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InquiryKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: Link,
    /// Comma-joined submitter identifiers.
    #[serde(rename = "from", default, deserialize_with = "null_as_default")]
    pub submitters: String,
    #[serde(rename = "replies", default)]
    pub reply_count: usize,
    #[serde(rename = "replies_data", default, deserialize_with = "null_as_default")]
    pub replies: Vec<Reply>,
    #[serde(default)]
    pub closed: bool,
    #[serde(rename = "submission_date", default, skip_serializing_if = "Option::is_none")]
    pub submitted_on: Option<String>,
}

impl Inquiry {
    pub fn new(id: impl Into<String>, kind: InquiryKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            url: Link::default(),
            submitters: String::new(),
            reply_count: 0,
            replies: Vec::new(),
            closed: false,
            submitted_on: None,
        }
    }

    pub fn key(&self, strategy: KeyStrategy) -> InquiryKey {
        InquiryKey {
            id: self.id.clone(),
            kind: match strategy {
                KeyStrategy::IdAndKind => Some(self.kind),
                KeyStrategy::IdOnly => None,
            },
        }
    }

    pub fn submitter_ids(&self) -> Vec<String> {
        split_ids(&self.submitters)
    }

    pub fn is_answered(&self) -> bool {
        self.reply_count > 0
    }

    /// Submission date and first-response latency derived from the record.
    ///
    /// An explicit submission date wins; otherwise the earliest reply receipt
    /// date stands in for it.
    pub fn timing(&self) -> InquiryTiming {
        let first_response = self
            .replies
            .iter()
            .map(|r| r.last_modified.as_str())
            .filter(|s| !s.is_empty())
            .min()
            .map(str::to_string);

        let submitted_on = match self.submitted_on.as_deref().filter(|s| !s.is_empty()) {
            Some(date) => Some(date.to_string()),
            None => self
                .replies
                .iter()
                .map(|r| r.receipt_date.as_str())
                .filter(|s| !s.is_empty())
                .min()
                .map(str::to_string),
        };

        let days_to_response = match (&submitted_on, &first_response) {
            (Some(from), Some(to)) => days_between(from, to),
            _ => None,
        };

        InquiryTiming {
            submitted_on,
            first_response,
            days_to_response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InquiryTiming {
    pub submitted_on: Option<String>,
    pub first_response: Option<String>,
    pub days_to_response: Option<i64>,
}

/// A detected increase of replies on one inquiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAnswer {
    pub key: InquiryKey,
    pub id: String,
    pub kind: InquiryKind,
    pub title: String,
    pub url: Link,
    /// Display text for the submitters: raw identifiers until names are resolved.
    pub submitters: String,
    pub submitter_ids: Vec<String>,
    pub previous_reply_count: usize,
    pub current_reply_count: usize,
    pub new_count: usize,
    pub has_prolongation: bool,
    pub reply_authors: Vec<String>,
    pub submitted_on: Option<String>,
    pub days_to_response: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representative {
    pub id: String,
    pub name: String,
    pub club: String,
}

impl Representative {
    /// Stand-in used when the directory lookup fails.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Poseł {id}"),
            club: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SnapshotStats {
    pub total: usize,
    pub answered: usize,
    pub unanswered: usize,
}

impl SnapshotStats {
    pub fn from_records(records: &[Inquiry]) -> Self {
        let answered = records.iter().filter(|r| r.is_answered()).count();
        Self {
            total: records.len(),
            answered,
            unanswered: records.len() - answered,
        }
    }

    pub fn answered_percentage(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.answered as f64 / self.total as f64 * 100.0)
        }
    }
}

/// Split a comma-joined identifier list, dropping blanks.
pub fn split_ids(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the date shapes the Sejm API emits (`2024-01-23T22:01:02`,
/// `2023-11-18`, `2024-01-23 22:01:02`, optionally with a UTC suffix).
pub fn parse_api_datetime(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.trim().replace('Z', "").replace("+00:00", "");
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Whole days between two API dates, `None` if either fails to parse.
pub fn days_between(from: &str, to: &str) -> Option<i64> {
    let from = parse_api_datetime(from)?;
    let to = parse_api_datetime(to)?;
    Some((to - from).num_days())
}

/// `dd.mm.yyyy` rendering, falling back to the raw text.
pub fn display_date(raw: &str) -> String {
    match parse_api_datetime(raw) {
        Some(dt) => dt.format("%d.%m.%Y").to_string(),
        None => raw.to_string(),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
