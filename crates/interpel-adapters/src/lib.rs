//! Sejm API adapters: raw record normalization, inquiry listing and
//! representative lookup.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use interpel_core::{Inquiry, InquiryKind, Link, Reply, Representative};
use interpel_storage::{FetchError, HttpFetcher};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "interpel-adapters";

pub const DEFAULT_API_BASE_URL: &str = "https://api.sejm.gov.pl";

/// Upper bound on records requested per list endpoint.
pub const LIST_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("field `{field}` has an unexpected type")]
    InvalidField { field: &'static str },
    #[error("record has no `num` identifier")]
    MissingId,
}

/// Convert one raw API record into the canonical inquiry record.
pub fn normalize_item(raw: &JsonValue, kind: InquiryKind) -> Result<Inquiry, NormalizeError> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
    let id = scalar_text(obj, "num")?;
    if id.trim().is_empty() {
        return Err(NormalizeError::MissingId);
    }

    let (reply_count, replies, closed) = normalize_replies(obj.get("replies"));

    Ok(Inquiry {
        id,
        kind,
        title: scalar_text(obj, "title")?,
        url: first_link(obj.get("links"))?,
        submitters: submitters_text(obj.get("from")),
        reply_count,
        replies,
        closed,
        submitted_on: ["submissionDate", "date", "created", "receiptDate"]
            .iter()
            .filter_map(|field| obj.get(*field).and_then(JsonValue::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string),
    })
}

/// Normalize a whole list response. Anything but a JSON array counts as
/// empty; malformed entries are logged and dropped.
pub fn normalize_batch(payload: &JsonValue, kind: InquiryKind) -> Vec<Inquiry> {
    let Some(items) = payload.as_array() else {
        warn!(%kind, "list response is not a JSON array; treating as empty");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match normalize_item(item, kind) {
            Ok(inquiry) => Some(inquiry),
            Err(err) => {
                warn!(%kind, index, error = %err, "skipping malformed api record");
                None
            }
        })
        .collect()
}

fn scalar_text(
    obj: &Map<String, JsonValue>,
    field: &'static str,
) -> Result<String, NormalizeError> {
    match obj.get(field) {
        None | Some(JsonValue::Null) => Ok(String::new()),
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        Some(JsonValue::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(NormalizeError::InvalidField { field }),
    }
}

fn first_link(links: Option<&JsonValue>) -> Result<Link, NormalizeError> {
    let first = match links {
        None | Some(JsonValue::Null) => return Ok(Link::default()),
        Some(JsonValue::Array(items)) => items.first(),
        Some(_) => return Err(NormalizeError::InvalidField { field: "links" }),
    };

    Ok(match first {
        None => Link::default(),
        Some(JsonValue::String(href)) => Link::Plain(href.clone()),
        Some(JsonValue::Object(link)) => match link.get("href").and_then(JsonValue::as_str) {
            Some(href) => Link::Structured {
                href: href.to_string(),
                rel: link.get("rel").and_then(JsonValue::as_str).map(str::to_string),
            },
            None => Link::Plain(JsonValue::Object(link.clone()).to_string()),
        },
        Some(other) => Link::Plain(other.to_string()),
    })
}

fn submitters_text(from: Option<&JsonValue>) -> String {
    match from {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Array(ids)) => ids
            .iter()
            .map(|id| match id {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

fn reply_text(reply: &Map<String, JsonValue>, field: &str) -> String {
    reply
        .get(field)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Count, detail list and closed flag. Only an explicit `prolongation: false`
/// closes an inquiry.
fn normalize_replies(replies: Option<&JsonValue>) -> (usize, Vec<Reply>, bool) {
    let Some(JsonValue::Array(entries)) = replies else {
        return (0, Vec::new(), false);
    };

    let mut closed = false;
    let details: Vec<Reply> = entries
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|reply| {
            let prolongation = reply.get("prolongation").and_then(JsonValue::as_bool);
            if prolongation == Some(false) {
                closed = true;
            }
            Reply {
                key: reply_text(reply, "key"),
                is_prolongation: prolongation.unwrap_or(false),
                last_modified: reply_text(reply, "lastModified"),
                receipt_date: reply_text(reply, "receiptDate"),
                author: reply_text(reply, "from"),
            }
        })
        .collect();

    (entries.len(), details, closed)
}

/// Where current inquiry records come from.
#[async_trait]
pub trait InquirySource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Every inquiry of both kinds submitted by `rep_id` in `term`.
    async fn fetch_inquiries(&self, term: &str, rep_id: &str) -> Result<Vec<Inquiry>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct SejmApiSource {
    http: HttpFetcher,
    base_url: String,
}

impl SejmApiSource {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn list_url(&self, term: &str, kind: InquiryKind, rep_id: &str) -> String {
        format!(
            "{}/sejm/term{term}/{}?limit={LIST_LIMIT}&sort_by=num&from={rep_id}",
            self.base_url,
            kind.endpoint()
        )
    }
}

#[async_trait]
impl InquirySource for SejmApiSource {
    fn source_id(&self) -> &'static str {
        "sejm-api"
    }

    async fn fetch_inquiries(
        &self,
        term: &str,
        rep_id: &str,
    ) -> Result<Vec<Inquiry>, AdapterError> {
        let mut inquiries = Vec::new();
        for kind in InquiryKind::ALL {
            let url = self.list_url(term, kind, rep_id);
            info!(%kind, url = %url, "fetching inquiry list");
            let payload = self.http.fetch_json(&url).await?;
            let batch = normalize_batch(&payload, kind);
            info!(%kind, count = batch.len(), "normalized inquiry list");
            inquiries.extend(batch);
        }
        Ok(inquiries)
    }
}

/// Resolves representative identifiers to display data. Never fails: an
/// unreachable directory yields placeholders.
#[async_trait]
pub trait RepresentativeLookup: Send + Sync {
    async fn representative(&self, term: &str, id: &str) -> Representative;

    /// Comma-joined display names for a list of identifiers.
    async fn display_names(&self, term: &str, ids: &[String]) -> String {
        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            names.push(self.representative(term, id).await.name);
        }
        names.join(", ")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MpPayload {
    #[serde(default)]
    first_last_name: Option<String>,
    #[serde(default)]
    club: Option<String>,
}

/// Sejm `MP` endpoint with a per-run memo so each identifier is requested once.
#[derive(Debug)]
pub struct SejmDirectory {
    http: HttpFetcher,
    base_url: String,
    timeout: Duration,
    cache: Mutex<HashMap<(String, String), Representative>>,
}

impl SejmDirectory {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn lookup(&self, term: &str, id: &str) -> Result<Representative, AdapterError> {
        let url = format!("{}/sejm/term{term}/MP/{id}", self.base_url);
        let payload = self.http.fetch_json_within(&url, self.timeout).await?;
        let mp: MpPayload = serde_json::from_value(payload)
            .map_err(|e| AdapterError::Message(format!("decoding MP {id}: {e}")))?;
        let name = mp.first_last_name.filter(|n| !n.trim().is_empty());
        Ok(match name {
            Some(name) => Representative {
                id: id.to_string(),
                name,
                club: mp.club.unwrap_or_default(),
            },
            None => Representative::placeholder(id),
        })
    }
}

#[async_trait]
impl RepresentativeLookup for SejmDirectory {
    async fn representative(&self, term: &str, id: &str) -> Representative {
        let cache_key = (term.to_string(), id.to_string());
        if let Some(hit) = self.cache.lock().await.get(&cache_key) {
            return hit.clone();
        }

        let resolved = match self.lookup(term, id).await {
            Ok(rep) => rep,
            Err(err) => {
                warn!(rep_id = id, error = %err, "representative lookup failed; using placeholder");
                Representative::placeholder(id)
            }
        };
        self.cache.lock().await.insert(cache_key, resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpel_core::SnapshotStats;
    use interpel_storage::{BackoffPolicy, HttpClientConfig};
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture(name: &str) -> JsonValue {
        let path = workspace_root().join("fixtures").join("sejm").join(name);
        let text = std::fs::read_to_string(&path).expect("read fixture");
        serde_json::from_str(&text).expect("parse fixture")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: None,
            backoff: BackoffPolicy::none(),
        })
        .expect("fetcher")
    }

    #[test]
    fn fixture_batch_drops_malformed_records_only() {
        let records =
            normalize_batch(&fixture("interpellations.json"), InquiryKind::Interpellation);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1204", "1377", "1618"]);

        let first = &records[0];
        assert_eq!(first.kind, InquiryKind::Interpellation);
        assert_eq!(first.submitters, "412, 88");
        assert_eq!(
            first.url.href(),
            "https://api.sejm.gov.pl/sejm/term10/interpellations/1204/body"
        );
        assert_eq!(first.reply_count, 2);
        assert!(first.replies[0].is_prolongation);
        assert_eq!(first.replies[1].author, "Sekretarz Stanu w Ministerstwie Zdrowia");
        assert!(first.closed, "explicit prolongation=false closes the inquiry");
        assert_eq!(first.submitted_on.as_deref(), Some("2024-02-05"));
    }

    #[test]
    fn missing_reply_fields_take_defaults() {
        let records =
            normalize_batch(&fixture("interpellations.json"), InquiryKind::Interpellation);
        let last = records.last().unwrap();
        assert_eq!(last.submitters, "412");
        assert_eq!(last.url, Link::default());
        assert_eq!(last.reply_count, 1);
        assert_eq!(
            last.replies[0],
            Reply {
                key: "E4RT7Y".into(),
                is_prolongation: false,
                last_modified: "2024-05-11T16:00:00".into(),
                receipt_date: String::new(),
                author: String::new(),
            }
        );
        assert!(!last.closed, "a missing prolongation flag does not close");
    }

    #[test]
    fn record_without_id_is_rejected() {
        assert_eq!(
            normalize_item(&json!({}), InquiryKind::WrittenQuestion),
            Err(NormalizeError::MissingId)
        );
        assert_eq!(
            normalize_item(&json!({"num": null, "title": "x"}), InquiryKind::Interpellation),
            Err(NormalizeError::MissingId)
        );
        let inquiry = normalize_item(&json!({"num": 7}), InquiryKind::WrittenQuestion).unwrap();
        assert_eq!(inquiry, Inquiry::new("7", InquiryKind::WrittenQuestion));
    }

    #[test]
    fn batch_drops_empty_records() {
        let records = normalize_batch(
            &json!([{}, {"num": 7, "title": "ok", "replies": []}]),
            InquiryKind::Interpellation,
        );
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["7"]);
        let stats = SnapshotStats::from_records(&records);
        assert_eq!((stats.total, stats.unanswered), (1, 1));
    }

    #[test]
    fn non_object_and_bad_field_types_are_rejected() {
        assert_eq!(
            normalize_item(&json!(42), InquiryKind::Interpellation),
            Err(NormalizeError::NotAnObject)
        );
        assert_eq!(
            normalize_item(&json!({"num": 1, "links": "nope"}), InquiryKind::Interpellation),
            Err(NormalizeError::InvalidField { field: "links" })
        );
    }

    #[test]
    fn non_array_payload_is_empty() {
        assert!(normalize_batch(&json!({"error": "x"}), InquiryKind::Interpellation).is_empty());
    }

    #[test]
    fn list_url_carries_term_limit_and_submitter() {
        let source = SejmApiSource::new(fetcher(), "https://api.example/");
        assert_eq!(
            source.list_url("10", InquiryKind::WrittenQuestion, "412"),
            "https://api.example/sejm/term10/writtenQuestions?limit=500&sort_by=num&from=412"
        );
    }

    #[tokio::test]
    async fn source_merges_both_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sejm/term10/interpellations"))
            .and(query_param("from", "412"))
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("interpellations.json")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sejm/term10/writtenQuestions"))
            .and(query_param("from", "412"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(fixture("written_questions.json")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = SejmApiSource::new(fetcher(), server.uri());
        let records = source.fetch_inquiries("10", "412").await.unwrap();
        assert_eq!(records.len(), 4);
        let last = records.last().unwrap();
        assert_eq!((last.id.as_str(), last.kind), ("1204", InquiryKind::WrittenQuestion));
    }

    #[tokio::test]
    async fn source_fails_when_an_endpoint_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sejm/term10/interpellations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = SejmApiSource::new(fetcher(), server.uri());
        let err = source.fetch_inquiries("10", "412").await.unwrap_err();
        assert!(matches!(err, AdapterError::Fetch(FetchError::HttpStatus { status: 500, .. })));
    }

    #[tokio::test]
    async fn directory_memoizes_lookups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sejm/term10/MP/412"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 412, "firstLastName": "Anna Nowak", "club": "KO"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let directory = SejmDirectory::new(fetcher(), server.uri());
        let names = directory
            .display_names("10", &["412".to_string(), "412".to_string()])
            .await;
        assert_eq!(names, "Anna Nowak, Anna Nowak");
        let rep = directory.representative("10", "412").await;
        assert_eq!(rep.club, "KO");
        assert_eq!(directory.cached_len().await, 1);
    }

    #[tokio::test]
    async fn directory_falls_back_to_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sejm/term10/MP/999"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let directory = SejmDirectory::new(fetcher(), server.uri());
        assert_eq!(directory.representative("10", "999").await.name, "Poseł 999");
        assert_eq!(directory.representative("10", "999").await.name, "Poseł 999");
    }
}
