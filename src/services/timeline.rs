//! Timeline views over email threads: event generation from messages and
//! the dense 1..N event ordering kept on every edit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{EmailAttachment, EmailMessage, EventType, TimelineEvent, TimelineView};
use crate::services::email_threads::{self, ThreadSummary};

/// The slice of a source message embedded in an event.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub subject: String,
    #[serde(rename = "from")]
    pub from_address: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub text_body: Option<String>,
    #[sqlx(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<EmailAttachment>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWithMessage {
    #[serde(flatten)]
    pub event: TimelineEvent,
    pub message: Option<MessageSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineDetail {
    #[serde(flatten)]
    pub timeline: TimelineView,
    pub thread: ThreadSummary,
    pub events: Vec<EventWithMessage>,
    pub event_count: usize,
}

/// Fields of a new event. Its order is assigned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub message_id: Option<String>,
    pub event_type: EventType,
    pub title: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineSettings {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub enum Generated {
    Created { timeline: TimelineView, events: usize },
    Existing(TimelineView),
}

impl Generated {
    pub fn timeline(&self) -> &TimelineView {
        match self {
            Generated::Created { timeline, .. } | Generated::Existing(timeline) => timeline,
        }
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{} {}", count, one)
    } else {
        format!("{} {}", count, many)
    }
}

pub fn classify(message: &EmailMessage) -> EventType {
    if message.is_replied {
        EventType::EmailReplied
    } else if message.is_forwarded {
        EventType::EmailForwarded
    } else {
        EventType::EmailReceived
    }
}

pub fn event_title(event_type: EventType) -> &'static str {
    match event_type {
        EventType::EmailReplied => "Email Reply",
        EventType::EmailForwarded => "Email Forwarded",
        EventType::EmailReceived => "Email Received",
        EventType::Custom => "Custom Event",
    }
}

pub fn describe(sender: &str, event_type: EventType, attachments: usize, replies: usize) -> String {
    let mut description = match event_type {
        EventType::EmailReplied => format!("Reply from {}", sender),
        EventType::EmailForwarded => format!("Forwarded by {}", sender),
        _ => format!("Email from {}", sender),
    };

    if attachments > 0 {
        description.push_str(&format!(" ({})", plural(attachments, "attachment", "attachments")));
    }
    if replies > 0 {
        description.push_str(&format!(" ({})", plural(replies, "reply", "replies")));
    }

    description
}

/// One event per message, ordered by timestamp. Ties keep the input order.
pub fn build_events(messages: &[EmailMessage], attachment_counts: &HashMap<String, usize>) -> Vec<NewEvent> {
    let mut reply_counts: HashMap<&str, usize> = HashMap::new();
    for message in messages {
        if let Some(parent) = &message.parent_message_id {
            *reply_counts.entry(parent.as_str()).or_insert(0) += 1;
        }
    }

    let mut ordered: Vec<&EmailMessage> = messages.iter().collect();
    ordered.sort_by_key(|m| m.timestamp);

    ordered
        .into_iter()
        .map(|message| {
            let attachments = attachment_counts.get(&message.id).copied().unwrap_or(0);
            let replies = reply_counts.get(message.id.as_str()).copied().unwrap_or(0);
            let event_type = classify(message);

            let recipients: Vec<&String> = message
                .to_addresses
                .iter()
                .chain(message.cc_addresses.iter())
                .collect();

            NewEvent {
                message_id: Some(message.id.clone()),
                event_type,
                title: event_title(event_type).to_string(),
                description: Some(describe(&message.from_address, event_type, attachments, replies)),
                timestamp: message.timestamp,
                metadata: Some(json!({
                    "sender": message.from_address,
                    "recipients": recipients,
                    "hasAttachments": attachments > 0,
                    "attachmentCount": attachments,
                    "replyCount": replies,
                    "isRead": message.is_read,
                    "isForwarded": message.is_forwarded,
                    "isReplied": message.is_replied,
                })),
            }
        })
        .collect()
}

/// Zero-based slot for an event inserted at a 1-based `order`. Missing or
/// out-of-range orders append.
pub fn insert_index(len: usize, order: Option<i64>) -> usize {
    match order {
        Some(order) if order >= 1 && (order as usize) <= len => (order - 1) as usize,
        _ => len,
    }
}

/// Move `id` to the 1-based position `order`, clamped to the list bounds.
/// Returns false when `id` is not in the list.
pub fn move_to(ids: &mut Vec<String>, id: &str, order: i64) -> bool {
    let Some(from) = ids.iter().position(|existing| existing == id) else {
        return false;
    };
    let item = ids.remove(from);
    let to = (order.max(1) as usize - 1).min(ids.len());
    ids.insert(to, item);
    true
}

/// A reorder request must name every event of the timeline exactly once.
pub fn check_permutation(current: &[String], proposed: &[String]) -> std::result::Result<(), String> {
    if proposed.is_empty() {
        return Err("eventIds must be a non-empty array".to_string());
    }
    if proposed.len() != current.len() {
        return Err(format!(
            "eventIds must list all {} events of the timeline, got {}",
            current.len(),
            proposed.len()
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for id in proposed {
        if !seen.insert(id.as_str()) {
            return Err(format!("Duplicate event id: {}", id));
        }
        if !current.contains(id) {
            return Err(format!("Event {} does not belong to this timeline", id));
        }
    }
    Ok(())
}

pub async fn event_ids(conn: &mut SqliteConnection, timeline_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM timeline_events WHERE timeline_id = ? ORDER BY sort_order, created_at, rowid",
    )
    .bind(timeline_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Persist `ids` as orders 1..N.
pub async fn write_order(conn: &mut SqliteConnection, ids: &[String]) -> Result<()> {
    let now = Utc::now();
    for (index, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE timeline_events SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(index as i64 + 1)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn insert_event(
    conn: &mut SqliteConnection,
    timeline_id: &str,
    event: &NewEvent,
    order: i64,
) -> std::result::Result<TimelineEvent, sqlx::Error> {
    let now = Utc::now();
    let stored = TimelineEvent {
        id: uuid::Uuid::new_v4().to_string(),
        timeline_id: timeline_id.to_string(),
        message_id: event.message_id.clone(),
        event_type: event.event_type,
        title: event.title.clone(),
        description: event.description.clone(),
        timestamp: event.timestamp,
        sort_order: order,
        metadata: event.metadata.clone().map(Json),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO timeline_events
            (id, timeline_id, message_id, event_type, title, description, timestamp, sort_order, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stored.id)
    .bind(&stored.timeline_id)
    .bind(&stored.message_id)
    .bind(stored.event_type)
    .bind(&stored.title)
    .bind(&stored.description)
    .bind(stored.timestamp)
    .bind(stored.sort_order)
    .bind(&stored.metadata)
    .bind(stored.created_at)
    .bind(stored.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(stored)
}

pub async fn find_by_thread(pool: &SqlitePool, thread_id: &str) -> Result<Option<TimelineView>> {
    let timeline = sqlx::query_as::<_, TimelineView>("SELECT * FROM timeline_views WHERE thread_id = ?")
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;
    Ok(timeline)
}

pub async fn find_timeline(pool: &SqlitePool, timeline_id: &str) -> Result<Option<TimelineView>> {
    let timeline = sqlx::query_as::<_, TimelineView>("SELECT * FROM timeline_views WHERE id = ?")
        .bind(timeline_id)
        .fetch_optional(pool)
        .await?;
    Ok(timeline)
}

/// Insert a timeline view for a thread with the given events, ordered 1..N
/// as supplied. Fails with a database unique violation when the thread
/// already has a timeline.
pub async fn create_timeline(
    pool: &SqlitePool,
    thread_id: &str,
    title: &str,
    description: Option<&str>,
    is_public: bool,
    events: &[NewEvent],
) -> std::result::Result<TimelineView, sqlx::Error> {
    let now = Utc::now();
    let timeline = TimelineView {
        id: uuid::Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        title: title.to_string(),
        description: description.map(str::to_string),
        is_public,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO timeline_views (id, thread_id, title, description, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&timeline.id)
    .bind(&timeline.thread_id)
    .bind(&timeline.title)
    .bind(&timeline.description)
    .bind(timeline.is_public)
    .bind(timeline.created_at)
    .bind(timeline.updated_at)
    .execute(&mut *tx)
    .await?;

    for (index, event) in events.iter().enumerate() {
        insert_event(&mut *tx, &timeline.id, event, index as i64 + 1).await?;
    }

    tx.commit().await?;
    Ok(timeline)
}

/// Build a timeline from the thread's messages. A thread that already has
/// a timeline gets it back unchanged.
pub async fn generate_for_thread(pool: &SqlitePool, thread_id: &str, settings: TimelineSettings) -> Result<Generated> {
    let thread = email_threads::find_thread(pool, thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;

    if let Some(existing) = find_by_thread(pool, thread_id).await? {
        log::debug!("Thread {} already has timeline {}", thread_id, existing.id);
        return Ok(Generated::Existing(existing));
    }

    let messages = email_threads::load_messages(pool, thread_id).await?;
    let attachment_counts: HashMap<String, usize> = email_threads::load_attachments(pool, thread_id)
        .await?
        .into_iter()
        .map(|(message_id, list)| (message_id, list.len()))
        .collect();

    let events = build_events(&messages, &attachment_counts);

    let title = settings
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("{} Timeline", thread.subject));
    let description = settings
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("Automatically generated timeline for {}", thread.subject));

    match create_timeline(pool, thread_id, &title, Some(&description), settings.is_public, &events).await {
        Ok(timeline) => {
            log::info!(
                "Generated timeline {} with {} events for thread {}",
                timeline.id,
                events.len(),
                thread_id
            );
            Ok(Generated::Created {
                timeline,
                events: events.len(),
            })
        }
        // Lost a race with another generator for the same thread.
        Err(e) if is_unique_violation(&e) => find_by_thread(pool, thread_id)
            .await?
            .map(Generated::Existing)
            .ok_or_else(|| e.into()),
        Err(e) => Err(e.into()),
    }
}

/// Source message summaries for the given message ids.
async fn load_message_summaries(pool: &SqlitePool, timeline_id: &str) -> Result<HashMap<String, MessageSummary>> {
    let summaries = sqlx::query_as::<_, MessageSummary>(
        r#"
        SELECT id, subject, from_address, timestamp, body, text_body FROM email_messages
        WHERE id IN (SELECT message_id FROM timeline_events WHERE timeline_id = ? AND message_id IS NOT NULL)
        "#,
    )
    .bind(timeline_id)
    .fetch_all(pool)
    .await?;

    Ok(summaries.into_iter().map(|s| (s.id.clone(), s)).collect())
}

pub async fn load_events(pool: &SqlitePool, timeline_id: &str) -> Result<Vec<EventWithMessage>> {
    let events = sqlx::query_as::<_, TimelineEvent>(
        "SELECT * FROM timeline_events WHERE timeline_id = ? ORDER BY sort_order, created_at, rowid",
    )
    .bind(timeline_id)
    .fetch_all(pool)
    .await?;

    let summaries = load_message_summaries(pool, timeline_id).await?;

    Ok(events
        .into_iter()
        .map(|event| {
            let message = event.message_id.as_ref().and_then(|id| summaries.get(id).cloned());
            EventWithMessage { event, message }
        })
        .collect())
}

/// One event with its source message and that message's attachments.
pub async fn load_event(pool: &SqlitePool, timeline_id: &str, event_id: &str) -> Result<Option<EventWithMessage>> {
    let event = sqlx::query_as::<_, TimelineEvent>(
        "SELECT * FROM timeline_events WHERE id = ? AND timeline_id = ?",
    )
    .bind(event_id)
    .bind(timeline_id)
    .fetch_optional(pool)
    .await?;

    let Some(event) = event else {
        return Ok(None);
    };

    let message = match &event.message_id {
        Some(message_id) => {
            let summary = sqlx::query_as::<_, MessageSummary>(
                "SELECT id, subject, from_address, timestamp, body, text_body FROM email_messages WHERE id = ?",
            )
            .bind(message_id)
            .fetch_optional(pool)
            .await?;

            match summary {
                Some(mut summary) => {
                    let attachments = sqlx::query_as::<_, EmailAttachment>(
                        "SELECT * FROM email_attachments WHERE message_id = ? ORDER BY created_at, rowid",
                    )
                    .bind(message_id)
                    .fetch_all(pool)
                    .await?;
                    summary.attachments = Some(attachments);
                    Some(summary)
                }
                None => None,
            }
        }
        None => None,
    };

    Ok(Some(EventWithMessage { event, message }))
}

pub async fn load_detail(pool: &SqlitePool, timeline_id: &str) -> Result<Option<TimelineDetail>> {
    let Some(timeline) = find_timeline(pool, timeline_id).await? else {
        return Ok(None);
    };

    let thread = email_threads::find_thread(pool, &timeline.thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;
    let thread = email_threads::load_summary(pool, thread).await?;
    let events = load_events(pool, timeline_id).await?;

    Ok(Some(TimelineDetail {
        event_count: events.len(),
        timeline,
        thread,
        events,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: &str, minute: u32) -> EmailMessage {
        let ts = Utc.with_ymd_and_hms(2024, 11, 15, 10, minute, 0).unwrap();
        EmailMessage {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            message_id: format!("ext-{}", id),
            from_address: "john@co.com".to_string(),
            to_addresses: Json(vec!["alice@co.com".to_string()]),
            cc_addresses: Json(vec!["bob@co.com".to_string()]),
            bcc_addresses: Json(vec![]),
            subject: "Launch".to_string(),
            body: "<p>hi</p>".to_string(),
            text_body: None,
            timestamp: ts,
            is_read: false,
            is_forwarded: false,
            is_replied: false,
            parent_message_id: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_events_follow_timestamps() {
        let messages = vec![message("c", 30), message("a", 10), message("b", 20)];
        let events = build_events(&messages, &HashMap::new());

        let ids: Vec<_> = events.iter().map(|e| e.message_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let messages = vec![message("first", 10), message("second", 10)];
        let events = build_events(&messages, &HashMap::new());
        assert_eq!(events[0].message_id.as_deref(), Some("first"));
        assert_eq!(events[1].message_id.as_deref(), Some("second"));
    }

    #[test]
    fn test_reply_wins_over_forward() {
        let mut m = message("a", 0);
        m.is_replied = true;
        m.is_forwarded = true;
        assert_eq!(classify(&m), EventType::EmailReplied);

        m.is_replied = false;
        assert_eq!(classify(&m), EventType::EmailForwarded);

        m.is_forwarded = false;
        assert_eq!(classify(&m), EventType::EmailReceived);
    }

    #[test]
    fn test_description_counts() {
        assert_eq!(describe("a@co.com", EventType::EmailReceived, 0, 0), "Email from a@co.com");
        assert_eq!(
            describe("a@co.com", EventType::EmailReplied, 1, 1),
            "Reply from a@co.com (1 attachment) (1 reply)"
        );
        assert_eq!(
            describe("a@co.com", EventType::EmailForwarded, 3, 2),
            "Forwarded by a@co.com (3 attachments) (2 replies)"
        );
    }

    #[test]
    fn test_metadata_and_reply_counts() {
        let root = message("root", 0);
        let mut reply = message("reply", 5);
        reply.parent_message_id = Some("root".to_string());
        reply.is_replied = true;

        let mut counts = HashMap::new();
        counts.insert("root".to_string(), 2);

        let events = build_events(&[root, reply], &counts);
        let meta = events[0].metadata.clone().unwrap();

        assert_eq!(events[0].title, "Email Received");
        assert_eq!(events[0].description.as_deref(), Some("Email from john@co.com (2 attachments) (1 reply)"));
        assert_eq!(meta["recipients"], json!(["alice@co.com", "bob@co.com"]));
        assert_eq!(meta["hasAttachments"], json!(true));
        assert_eq!(meta["replyCount"], json!(1));
        assert_eq!(events[1].event_type, EventType::EmailReplied);
        assert_eq!(events[1].metadata.as_ref().unwrap()["isReplied"], json!(true));
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_index() {
        assert_eq!(insert_index(3, None), 3);
        assert_eq!(insert_index(3, Some(1)), 0);
        assert_eq!(insert_index(3, Some(3)), 2);
        assert_eq!(insert_index(3, Some(4)), 3);
        assert_eq!(insert_index(3, Some(0)), 3);
    }

    #[test]
    fn test_move_to() {
        let mut list = ids(&["a", "b", "c", "d"]);
        assert!(move_to(&mut list, "d", 1));
        assert_eq!(list, ids(&["d", "a", "b", "c"]));

        assert!(move_to(&mut list, "d", 99));
        assert_eq!(list, ids(&["a", "b", "c", "d"]));

        assert!(move_to(&mut list, "a", 2));
        assert_eq!(list, ids(&["b", "a", "c", "d"]));

        assert!(!move_to(&mut list, "zzz", 1));
    }

    #[test]
    fn test_check_permutation() {
        let current = ids(&["a", "b", "c"]);
        assert!(check_permutation(&current, &ids(&["c", "a", "b"])).is_ok());
        assert!(check_permutation(&current, &[]).is_err());
        assert!(check_permutation(&current, &ids(&["a", "b"])).is_err());
        assert!(check_permutation(&current, &ids(&["a", "a", "b"])).is_err());
        assert!(check_permutation(&current, &ids(&["a", "b", "x"])).is_err());
    }
}
