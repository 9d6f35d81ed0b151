//! Email import normalization.
//!
//! Every import source is mapped onto [`NormalizedImport`]: one subject, an
//! optional external thread key, the ordered messages, a deduplicated
//! participant list and the tags. No MIME parsing happens here; file imports
//! carry their raw content through as an opaque body.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::models::{AttachmentInput, ParticipantRole, TagInput};

const UNKNOWN_ADDRESS: &str = "unknown@example.com";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    ForwardedEmail,
    EmailFile,
    ApiIntegration,
    Manual,
}

impl ImportSource {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forwarded_email" => Some(ImportSource::ForwardedEmail),
            "email_file" => Some(ImportSource::EmailFile),
            "api_integration" => Some(ImportSource::ApiIntegration),
            "manual" => Some(ImportSource::Manual),
            _ => None,
        }
    }
}

/// Address fields accept either a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardedEmailData {
    subject: Option<String>,
    from: Option<String>,
    to: Option<OneOrMany>,
    cc: Option<OneOrMany>,
    bcc: Option<OneOrMany>,
    body: Option<String>,
    text_body: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    attachments: Vec<AttachmentInput>,
    project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailFileData {
    eml_content: Option<String>,
    msg_content: Option<String>,
    subject: Option<String>,
    from: Option<String>,
    to: Option<OneOrMany>,
    cc: Option<OneOrMany>,
    bcc: Option<OneOrMany>,
    body: Option<String>,
    text_body: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    attachments: Vec<AttachmentInput>,
    project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    message_id: Option<String>,
    from: Option<String>,
    to: Option<OneOrMany>,
    cc: Option<OneOrMany>,
    bcc: Option<OneOrMany>,
    subject: Option<String>,
    body: Option<String>,
    text_body: Option<String>,
    timestamp: Option<String>,
    is_read: Option<bool>,
    is_forwarded: Option<bool>,
    is_replied: Option<bool>,
    parent_message_id: Option<String>,
    #[serde(default)]
    attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Deserialize)]
struct RawParticipant {
    email: String,
    name: Option<String>,
    role: ParticipantRole,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadData {
    subject: Option<String>,
    thread_id: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    participants: Vec<RawParticipant>,
    #[serde(default)]
    tags: Vec<TagInput>,
    project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub text_body: Option<String>,
    /// `None` when the supplied timestamp could not be parsed.
    pub timestamp: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_forwarded: bool,
    pub is_replied: bool,
    pub parent_message_id: Option<String>,
    pub attachments: Vec<NormalizedAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParticipant {
    pub email: String,
    pub name: Option<String>,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone)]
pub struct NormalizedImport {
    pub subject: String,
    pub thread_key: Option<String>,
    pub messages: Vec<NormalizedMessage>,
    pub participants: Vec<NormalizedParticipant>,
    pub tags: Vec<TagInput>,
    pub project_id: Option<String>,
}

impl NormalizedImport {
    pub fn participant_emails(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.email.clone()).collect()
    }
}

/// Participants keyed by address; the first role seen for an address wins.
#[derive(Debug, Default)]
struct ParticipantList {
    seen: HashSet<String>,
    items: Vec<NormalizedParticipant>,
}

impl ParticipantList {
    fn push(&mut self, email: &str, name: Option<String>, role: ParticipantRole) {
        if email.is_empty() {
            return;
        }
        if self.seen.insert(email.to_string()) {
            self.items.push(NormalizedParticipant {
                email: email.to_string(),
                name,
                role,
            });
        } else if let Some(existing) = self.items.iter_mut().find(|p| p.email == email) {
            if existing.name.is_none() {
                existing.name = name;
            }
        }
    }

    fn push_mailbox(&mut self, raw: &str, role: ParticipantRole) {
        let (name, email) = parse_mailbox(raw);
        self.push(&email, name, role);
    }

    fn into_vec(self) -> Vec<NormalizedParticipant> {
        self.items
    }
}

static MAILBOX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*"?([^"<]*?)"?\s*<\s*([^<>\s]+)\s*>\s*$"#).expect("valid mailbox regex")
});

/// Split `Display Name <addr@host>` into its parts. Addresses are trimmed
/// and lower-cased; a bare address yields no name.
pub fn parse_mailbox(raw: &str) -> (Option<String>, String) {
    if let Some(caps) = MAILBOX_RE.captures(raw) {
        let name = caps.get(1).map(|m| m.as_str().trim()).filter(|s| !s.is_empty());
        let email = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        return (name.map(str::to_string), normalize_address(email));
    }
    (None, normalize_address(raw))
}

pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn addresses(list: Option<OneOrMany>) -> Vec<String> {
    list.map(OneOrMany::into_vec)
        .unwrap_or_default()
        .iter()
        .map(|raw| parse_mailbox(raw).1)
        .filter(|addr| !addr.is_empty())
        .collect()
}

/// Raw entries kept alongside the bare addresses so display names can feed
/// the participant list.
fn raw_entries(list: &Option<OneOrMany>) -> Vec<String> {
    match list {
        Some(OneOrMany::One(s)) => vec![s.clone()],
        Some(OneOrMany::Many(v)) => v.clone(),
        None => Vec::new(),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn timestamp_or(raw: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => parse_timestamp(value),
        None => Some(now),
    }
}

fn attachments(list: Vec<AttachmentInput>) -> Vec<NormalizedAttachment> {
    list.into_iter()
        .enumerate()
        .map(|(index, att)| NormalizedAttachment {
            filename: att
                .filename
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| format!("attachment_{}", index + 1)),
            content_type: att
                .content_type
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: att.size.unwrap_or(0).max(0),
            url: att.url,
        })
        .collect()
}

/// Stable key for a forwarded email so re-forwarding the same mail maps to
/// the same thread.
pub fn forwarded_thread_key(subject: &str, from: &str, to: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}-{}", subject, from, to.join(",")).as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(hasher.finalize());
    format!("forwarded_{}", &encoded[..16])
}

fn participants_from_messages(raw: &[RawMessage]) -> Vec<NormalizedParticipant> {
    let mut list = ParticipantList::default();
    for message in raw {
        if let Some(from) = &message.from {
            list.push_mailbox(from, ParticipantRole::From);
        }
        for entry in raw_entries(&message.to) {
            list.push_mailbox(&entry, ParticipantRole::To);
        }
        for entry in raw_entries(&message.cc) {
            list.push_mailbox(&entry, ParticipantRole::Cc);
        }
        for entry in raw_entries(&message.bcc) {
            list.push_mailbox(&entry, ParticipantRole::Bcc);
        }
    }
    list.into_vec()
}

fn normalize_message(raw: RawMessage, fallback_id: String, now: DateTime<Utc>) -> NormalizedMessage {
    NormalizedMessage {
        message_id: raw
            .message_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(fallback_id),
        from: raw.from.as_deref().map(|f| parse_mailbox(f).1).unwrap_or_default(),
        to: addresses(raw.to),
        cc: addresses(raw.cc),
        bcc: addresses(raw.bcc),
        subject: raw.subject.unwrap_or_default(),
        body: raw.body.unwrap_or_default(),
        text_body: raw.text_body,
        timestamp: timestamp_or(raw.timestamp.as_deref(), now),
        is_read: raw.is_read.unwrap_or(false),
        is_forwarded: raw.is_forwarded.unwrap_or(false),
        is_replied: raw.is_replied.unwrap_or(false),
        parent_message_id: raw.parent_message_id.filter(|id| !id.trim().is_empty()),
        attachments: attachments(raw.attachments),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| AppError::BadRequest(format!("Invalid import data: {}", e)))
}

/// Map a source-specific payload onto the common import shape.
pub fn normalize(source: ImportSource, data: serde_json::Value, now: DateTime<Utc>) -> Result<NormalizedImport> {
    let millis = now.timestamp_millis();

    let import = match source {
        ImportSource::ForwardedEmail => {
            let data: ForwardedEmailData = decode(data)?;
            let subject = data
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Forwarded Email".to_string());
            let raw = RawMessage {
                message_id: Some(format!("forwarded_msg_{}", millis)),
                from: data.from,
                to: data.to,
                cc: data.cc,
                bcc: data.bcc,
                subject: Some(subject.clone()),
                body: data.body,
                text_body: data.text_body,
                timestamp: data.timestamp,
                is_forwarded: Some(true),
                attachments: data.attachments,
                ..RawMessage::default()
            };
            let participants = participants_from_messages(std::slice::from_ref(&raw));
            let message = normalize_message(raw, format!("forwarded_msg_{}", millis), now);
            let thread_key = forwarded_thread_key(&subject, &message.from, &message.to);

            NormalizedImport {
                subject,
                thread_key: Some(thread_key),
                messages: vec![message],
                participants,
                tags: Vec::new(),
                project_id: data.project_id,
            }
        }
        ImportSource::EmailFile => {
            let data: EmailFileData = decode(data)?;
            let subject = data
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Imported Email".to_string());
            let to = match data.to {
                Some(to) if !to.clone().into_vec().iter().all(|t| t.trim().is_empty()) => to,
                _ => OneOrMany::One(UNKNOWN_ADDRESS.to_string()),
            };
            let from = data
                .from
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
            let body = data
                .eml_content
                .or(data.msg_content)
                .or(data.body)
                .unwrap_or_default();
            let raw = RawMessage {
                from: Some(from),
                to: Some(to),
                cc: data.cc,
                bcc: data.bcc,
                subject: Some(subject.clone()),
                body: Some(body),
                text_body: data.text_body,
                timestamp: data.timestamp,
                attachments: data.attachments,
                ..RawMessage::default()
            };
            let participants = participants_from_messages(std::slice::from_ref(&raw));

            NormalizedImport {
                subject,
                thread_key: Some(format!("file_import_{}", uuid::Uuid::new_v4().simple())),
                messages: vec![normalize_message(raw, format!("file_msg_{}", millis), now)],
                participants,
                tags: Vec::new(),
                project_id: data.project_id,
            }
        }
        ImportSource::ApiIntegration => {
            let data: ThreadData = decode(data)?;
            let participants = if data.participants.is_empty() {
                participants_from_messages(&data.messages)
            } else {
                let mut list = ParticipantList::default();
                for p in data.participants {
                    let (display, email) = parse_mailbox(&p.email);
                    list.push(&email, p.name.or(display), p.role);
                }
                list.into_vec()
            };
            let messages = data
                .messages
                .into_iter()
                .enumerate()
                .map(|(i, raw)| normalize_message(raw, format!("api_msg_{}_{}", millis, i), now))
                .collect();

            NormalizedImport {
                subject: data
                    .subject
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "API Imported Email".to_string()),
                thread_key: Some(
                    data.thread_id
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| format!("api_import_{}", uuid::Uuid::new_v4().simple())),
                ),
                messages,
                participants,
                tags: data.tags,
                project_id: data.project_id,
            }
        }
        ImportSource::Manual => {
            let data: ThreadData = decode(data)?;
            let participants = participants_from_messages(&data.messages);
            let messages = data
                .messages
                .into_iter()
                .enumerate()
                .map(|(i, raw)| normalize_message(raw, format!("manual_msg_{}_{}", millis, i), now))
                .collect();

            NormalizedImport {
                subject: data.subject.unwrap_or_default(),
                thread_key: data.thread_id.filter(|t| !t.trim().is_empty()),
                messages,
                participants,
                tags: data.tags,
                project_id: data.project_id,
            }
        }
    };

    Ok(import)
}

/// Collect every problem with an import instead of stopping at the first.
pub fn validate(import: &NormalizedImport) -> Vec<String> {
    let mut errors = Vec::new();

    if import.subject.trim().is_empty() {
        errors.push("Subject is required".to_string());
    }

    if import.messages.is_empty() {
        errors.push("At least one message is required".to_string());
    }

    for (i, message) in import.messages.iter().enumerate() {
        let n = i + 1;
        if message.from.is_empty() {
            errors.push(format!("Message {}: from field is required", n));
        }
        if message.to.is_empty() {
            errors.push(format!("Message {}: to field is required", n));
        }
        if message.subject.trim().is_empty() {
            errors.push(format!("Message {}: subject is required", n));
        }
        if message.body.trim().is_empty() {
            errors.push(format!("Message {}: body is required", n));
        }
        if message.timestamp.is_none() {
            errors.push(format!("Message {}: timestamp is invalid", n));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(ImportSource::parse("manual"), Some(ImportSource::Manual));
        assert_eq!(ImportSource::parse("email_file"), Some(ImportSource::EmailFile));
        assert_eq!(ImportSource::parse("outlook"), None);
    }

    #[test]
    fn test_parse_mailbox() {
        assert_eq!(
            parse_mailbox("Alice Smith <Alice.Smith@Company.com>"),
            (Some("Alice Smith".to_string()), "alice.smith@company.com".to_string())
        );
        assert_eq!(
            parse_mailbox("\"Bob Wilson\" <bob@company.com>"),
            (Some("Bob Wilson".to_string()), "bob@company.com".to_string())
        );
        assert_eq!(parse_mailbox("  carol@company.com "), (None, "carol@company.com".to_string()));
    }

    #[test]
    fn test_manual_participants_first_role_wins() {
        let data = json!({
            "subject": "Launch",
            "messages": [
                { "from": "john@co.com", "to": ["alice@co.com"], "cc": "bob@co.com",
                  "subject": "Launch", "body": "<p>Hi</p>", "timestamp": "2024-11-15T10:00:00Z" },
                { "from": "alice@co.com", "to": "john@co.com", "bcc": ["bob@co.com", "sarah@co.com"],
                  "subject": "Re: Launch", "body": "Thanks", "timestamp": "2024-11-15T11:00:00Z" }
            ]
        });

        let import = normalize(ImportSource::Manual, data, now()).unwrap();
        let roles: Vec<(String, ParticipantRole)> = import
            .participants
            .iter()
            .map(|p| (p.email.clone(), p.role))
            .collect();

        assert_eq!(
            roles,
            vec![
                ("john@co.com".to_string(), ParticipantRole::From),
                ("alice@co.com".to_string(), ParticipantRole::To),
                ("bob@co.com".to_string(), ParticipantRole::Cc),
                ("sarah@co.com".to_string(), ParticipantRole::Bcc),
            ]
        );
        assert_eq!(import.messages.len(), 2);
        assert_eq!(import.messages[0].message_id, format!("manual_msg_{}_0", now().timestamp_millis()));
        assert!(import.thread_key.is_none());
        assert!(validate(&import).is_empty());
    }

    #[test]
    fn test_forwarded_key_is_stable() {
        let data = json!({
            "subject": "Quarterly numbers",
            "from": "Finance <finance@co.com>",
            "to": "ceo@co.com",
            "body": "See below"
        });

        let first = normalize(ImportSource::ForwardedEmail, data.clone(), now()).unwrap();
        let later = now() + chrono::Duration::minutes(5);
        let second = normalize(ImportSource::ForwardedEmail, data, later).unwrap();

        assert_eq!(first.thread_key, second.thread_key);
        let key = first.thread_key.unwrap();
        assert!(key.starts_with("forwarded_"));
        assert_eq!(key.len(), "forwarded_".len() + 16);

        let message = &first.messages[0];
        assert!(message.is_forwarded);
        assert_eq!(message.from, "finance@co.com");
        assert_eq!(message.timestamp, Some(now()));
        assert_eq!(first.participants[0].name.as_deref(), Some("Finance"));
    }

    #[test]
    fn test_forwarded_key_differs_by_recipient() {
        let a = forwarded_thread_key("Hello", "a@co.com", &["b@co.com".to_string()]);
        let b = forwarded_thread_key("Hello", "a@co.com", &["c@co.com".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_forwarded_attachment_defaults() {
        let data = json!({
            "subject": "Files",
            "from": "a@co.com",
            "to": ["b@co.com"],
            "body": "attached",
            "attachments": [{ "url": "https://example.com/x" }, { "filename": "deck.pdf", "size": 10 }]
        });
        let import = normalize(ImportSource::ForwardedEmail, data, now()).unwrap();
        let atts = &import.messages[0].attachments;
        assert_eq!(atts[0].filename, "attachment_1");
        assert_eq!(atts[0].content_type, "application/octet-stream");
        assert_eq!(atts[1].filename, "deck.pdf");
        assert_eq!(atts[1].size, 10);
    }

    #[test]
    fn test_email_file_defaults_and_opaque_body() {
        let data = json!({ "emlContent": "From: x\r\nSubject: raw\r\n\r\nbody" });
        let import = normalize(ImportSource::EmailFile, data, now()).unwrap();

        assert_eq!(import.subject, "Imported Email");
        assert!(import.thread_key.as_deref().unwrap().starts_with("file_import_"));
        let message = &import.messages[0];
        assert_eq!(message.from, UNKNOWN_ADDRESS);
        assert_eq!(message.to, vec![UNKNOWN_ADDRESS.to_string()]);
        assert_eq!(message.body, "From: x\r\nSubject: raw\r\n\r\nbody");
        // Both addresses are the placeholder, so only one participant remains.
        assert_eq!(import.participants.len(), 1);
    }

    #[test]
    fn test_api_integration_uses_supplied_participants_and_tags() {
        let data = json!({
            "threadId": "gmail-123",
            "subject": "Sync",
            "messages": [{ "from": "a@co.com", "to": ["b@co.com"], "subject": "Sync", "body": "x" }],
            "participants": [
                { "email": "A@co.com", "name": "Ann", "role": "FROM" },
                { "email": "a@co.com", "role": "TO" },
                { "email": "b@co.com", "role": "TO" }
            ],
            "tags": [{ "name": "client", "color": "#F59E0B" }]
        });
        let import = normalize(ImportSource::ApiIntegration, data, now()).unwrap();

        assert_eq!(import.thread_key.as_deref(), Some("gmail-123"));
        assert_eq!(import.participants.len(), 2);
        assert_eq!(import.participants[0].role, ParticipantRole::From);
        assert_eq!(import.participants[0].name.as_deref(), Some("Ann"));
        assert_eq!(import.tags[0].name, "client");
        assert_eq!(import.messages[0].message_id, format!("api_msg_{}_0", now().timestamp_millis()));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let data = json!({
            "subject": " ",
            "messages": [{ "from": "", "to": [], "subject": "", "body": "", "timestamp": "yesterday" }]
        });
        let import = normalize(ImportSource::Manual, data, now()).unwrap();
        let errors = validate(&import);

        assert_eq!(
            errors,
            vec![
                "Subject is required",
                "Message 1: from field is required",
                "Message 1: to field is required",
                "Message 1: subject is required",
                "Message 1: body is required",
                "Message 1: timestamp is invalid",
            ]
        );
    }

    #[test]
    fn test_validation_requires_messages() {
        let import = normalize(ImportSource::Manual, json!({ "subject": "Empty" }), now()).unwrap();
        assert_eq!(validate(&import), vec!["At least one message is required"]);
    }

    #[test]
    fn test_malformed_payload_is_bad_request() {
        let result = normalize(ImportSource::Manual, json!({ "messages": "nope" }), now());
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 11, 15, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-11-15T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-11-15T15:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-11-15 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("15/11/2024"), None);
    }
}
