use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{EmailAttachment, EmailMessage, EmailParticipant, EmailThread, ThreadTag, TimelineEvent, TimelineView};

/// A message with its attachments and the ids of messages replying to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: EmailMessage,
    pub attachments: Vec<EmailAttachment>,
    pub reply_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadTimeline {
    #[serde(flatten)]
    pub timeline: TimelineView,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: EmailThread,
    pub participants: Vec<EmailParticipant>,
    pub tags: Vec<ThreadTag>,
    pub messages: Vec<MessageDetail>,
    pub message_count: i64,
    pub timeline_view: Option<ThreadTimeline>,
}

/// Thread header with participants and tags but no message bodies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: EmailThread,
    pub participants: Vec<EmailParticipant>,
    pub tags: Vec<ThreadTag>,
    pub message_count: i64,
}

pub async fn find_thread(pool: &SqlitePool, thread_id: &str) -> Result<Option<EmailThread>> {
    let thread = sqlx::query_as::<_, EmailThread>("SELECT * FROM email_threads WHERE id = ?")
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;
    Ok(thread)
}

pub async fn load_participants(pool: &SqlitePool, thread_id: &str) -> Result<Vec<EmailParticipant>> {
    let participants = sqlx::query_as::<_, EmailParticipant>(
        "SELECT * FROM email_participants WHERE thread_id = ? ORDER BY created_at, rowid",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;
    Ok(participants)
}

pub async fn load_tags(pool: &SqlitePool, thread_id: &str) -> Result<Vec<ThreadTag>> {
    let tags = sqlx::query_as::<_, ThreadTag>(
        "SELECT * FROM thread_tags WHERE thread_id = ? ORDER BY created_at, rowid",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;
    Ok(tags)
}

pub async fn message_count(pool: &SqlitePool, thread_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM email_messages WHERE thread_id = ?")
        .bind(thread_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Messages of a thread in timestamp order, ties broken by insertion order.
pub async fn load_messages(pool: &SqlitePool, thread_id: &str) -> Result<Vec<EmailMessage>> {
    let messages = sqlx::query_as::<_, EmailMessage>(
        "SELECT * FROM email_messages WHERE thread_id = ? ORDER BY timestamp ASC, rowid ASC",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

/// Attachments of every message in a thread, keyed by message id.
pub async fn load_attachments(pool: &SqlitePool, thread_id: &str) -> Result<HashMap<String, Vec<EmailAttachment>>> {
    let attachments = sqlx::query_as::<_, EmailAttachment>(
        r#"
        SELECT a.* FROM email_attachments a
        JOIN email_messages m ON m.id = a.message_id
        WHERE m.thread_id = ?
        ORDER BY a.created_at, a.rowid
        "#,
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;

    let mut by_message: HashMap<String, Vec<EmailAttachment>> = HashMap::new();
    for attachment in attachments {
        by_message
            .entry(attachment.message_id.clone())
            .or_default()
            .push(attachment);
    }
    Ok(by_message)
}

/// Attach attachments and reply ids to each message.
pub fn assemble_messages(
    messages: Vec<EmailMessage>,
    mut attachments: HashMap<String, Vec<EmailAttachment>>,
) -> Vec<MessageDetail> {
    let mut replies: HashMap<String, Vec<String>> = HashMap::new();
    for message in &messages {
        if let Some(parent) = &message.parent_message_id {
            replies.entry(parent.clone()).or_default().push(message.id.clone());
        }
    }

    messages
        .into_iter()
        .map(|message| MessageDetail {
            attachments: attachments.remove(&message.id).unwrap_or_default(),
            reply_ids: replies.remove(&message.id).unwrap_or_default(),
            message,
        })
        .collect()
}

pub async fn load_message_details(pool: &SqlitePool, thread_id: &str) -> Result<Vec<MessageDetail>> {
    let messages = load_messages(pool, thread_id).await?;
    let attachments = load_attachments(pool, thread_id).await?;
    Ok(assemble_messages(messages, attachments))
}

pub async fn load_summary(pool: &SqlitePool, thread: EmailThread) -> Result<ThreadSummary> {
    let participants = load_participants(pool, &thread.id).await?;
    let tags = load_tags(pool, &thread.id).await?;
    let message_count = message_count(pool, &thread.id).await?;

    Ok(ThreadSummary {
        thread,
        participants,
        tags,
        message_count,
    })
}

pub async fn load_detail(pool: &SqlitePool, thread_id: &str) -> Result<Option<ThreadDetail>> {
    let thread = match find_thread(pool, thread_id).await? {
        Some(thread) => thread,
        None => return Ok(None),
    };

    let participants = load_participants(pool, thread_id).await?;
    let tags = load_tags(pool, thread_id).await?;
    let messages = load_message_details(pool, thread_id).await?;

    let timeline = sqlx::query_as::<_, TimelineView>("SELECT * FROM timeline_views WHERE thread_id = ?")
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;

    let timeline_view = match timeline {
        Some(timeline) => {
            let events = sqlx::query_as::<_, TimelineEvent>(
                "SELECT * FROM timeline_events WHERE timeline_id = ? ORDER BY sort_order",
            )
            .bind(&timeline.id)
            .fetch_all(pool)
            .await?;
            Some(ThreadTimeline { timeline, events })
        }
        None => None,
    };

    Ok(Some(ThreadDetail {
        thread,
        participants,
        tags,
        message_count: messages.len() as i64,
        messages,
        timeline_view,
    }))
}
