use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::handlers::projects::{find_project, find_user_summary};
use crate::handlers::{PageQuery, Pagination};
use crate::models::{AttachmentInput, ProjectThread, ProjectThreadTag, ThreadMessage, ThreadMessageAttachment, UserSummary};
use crate::utils::fields::{deserialize_some, non_blank};

const TAG_COLORS: &[&str] = &[
    "#EF4444", "#F97316", "#F59E0B", "#10B981", "#14B8A6", "#3B82F6", "#6366F1", "#8B5CF6", "#EC4899", "#64748B",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThreadRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub is_pinned: Option<bool>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub content: String,
    pub user_id: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: ThreadMessage,
    pub user: Option<UserSummary>,
    pub attachments: Vec<ThreadMessageAttachment>,
    pub replies: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: ProjectThread,
    pub creator: Option<UserSummary>,
    pub tags: Vec<ProjectThreadTag>,
    pub latest_message: Option<MessageView>,
    pub message_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: ProjectThread,
    pub creator: Option<UserSummary>,
    pub tags: Vec<ProjectThreadTag>,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ThreadRef {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMessage {
    #[serde(flatten)]
    pub message: MessageView,
    pub thread: Option<ThreadRef>,
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    pub id: String,
    pub content: String,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct TimelineDay {
    pub date: String,
    pub messages: Vec<TimelineMessage>,
}

/// Stable color for a tag name.
pub fn tag_color(name: &str) -> &'static str {
    let digest = Sha256::digest(name.as_bytes());
    TAG_COLORS[digest[0] as usize % TAG_COLORS.len()]
}

/// Group messages by UTC day, newest day first, oldest message first
/// within a day.
pub fn group_by_day(messages: Vec<TimelineMessage>) -> Vec<TimelineDay> {
    let mut days: BTreeMap<String, Vec<TimelineMessage>> = BTreeMap::new();
    for message in messages {
        let date = message.message.message.created_at.format("%Y-%m-%d").to_string();
        days.entry(date).or_default().push(message);
    }

    days.into_iter()
        .rev()
        .map(|(date, mut messages)| {
            messages.sort_by_key(|m| m.message.message.created_at);
            TimelineDay { date, messages }
        })
        .collect()
}

async fn find_thread(pool: &SqlitePool, project_id: &str, thread_id: &str) -> Result<ProjectThread> {
    sqlx::query_as::<_, ProjectThread>("SELECT * FROM project_threads WHERE id = ? AND project_id = ?")
        .bind(thread_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Thread"))
}

async fn load_tags(pool: &SqlitePool, thread_id: &str) -> Result<Vec<ProjectThreadTag>> {
    let tags = sqlx::query_as::<_, ProjectThreadTag>(
        "SELECT * FROM project_thread_tags WHERE thread_id = ? ORDER BY rowid",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;
    Ok(tags)
}

async fn replace_tags(conn: &mut sqlx::SqliteConnection, thread_id: &str, tags: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM project_thread_tags WHERE thread_id = ?")
        .bind(thread_id)
        .execute(&mut *conn)
        .await?;

    for name in tags.iter().filter_map(|t| non_blank(Some(t))) {
        sqlx::query("INSERT INTO project_thread_tags (id, thread_id, name, color) VALUES (?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(thread_id)
            .bind(&name)
            .bind(tag_color(&name))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn view(pool: &SqlitePool, message: ThreadMessage) -> Result<MessageView> {
    let user = find_user_summary(pool, &message.user_id).await?;
    let attachments = sqlx::query_as::<_, ThreadMessageAttachment>(
        "SELECT * FROM thread_message_attachments WHERE message_id = ? ORDER BY created_at, rowid",
    )
    .bind(&message.id)
    .fetch_all(pool)
    .await?;

    Ok(MessageView {
        message,
        user,
        attachments,
        replies: Vec::new(),
    })
}

/// A message with its direct replies, oldest first.
async fn view_with_replies(pool: &SqlitePool, message: ThreadMessage) -> Result<MessageView> {
    let replies = sqlx::query_as::<_, ThreadMessage>(
        "SELECT * FROM thread_messages WHERE parent_id = ? ORDER BY created_at, rowid",
    )
    .bind(&message.id)
    .fetch_all(pool)
    .await?;

    let mut result = view(pool, message).await?;
    for reply in replies {
        result.replies.push(view(pool, reply).await?);
    }
    Ok(result)
}

pub async fn list_threads(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let threads = sqlx::query_as::<_, ProjectThread>(
        "SELECT * FROM project_threads WHERE project_id = ? ORDER BY is_pinned DESC, updated_at DESC",
    )
    .bind(&project.id)
    .fetch_all(pool.get_ref())
    .await?;

    let mut summaries = Vec::with_capacity(threads.len());
    for thread in threads {
        let creator = match &thread.created_by {
            Some(user_id) => find_user_summary(pool.get_ref(), user_id).await?,
            None => None,
        };
        let tags = load_tags(pool.get_ref(), &thread.id).await?;
        let latest = sqlx::query_as::<_, ThreadMessage>(
            "SELECT * FROM thread_messages WHERE thread_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(&thread.id)
        .fetch_optional(pool.get_ref())
        .await?;
        let latest_message = match latest {
            Some(message) => Some(view(pool.get_ref(), message).await?),
            None => None,
        };
        let message_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM thread_messages WHERE thread_id = ?")
            .bind(&thread.id)
            .fetch_one(pool.get_ref())
            .await?;

        summaries.push(ThreadSummary {
            thread,
            creator,
            tags,
            latest_message,
            message_count,
        });
    }

    Ok(HttpResponse::Ok().json(summaries))
}

pub async fn create_thread(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<CreateThreadRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let title = non_blank(Some(&body.title))
        .ok_or_else(|| AppError::BadRequest("Thread title is required".to_string()))?;

    let creator = match &body.user_id {
        Some(user_id) => Some(
            find_user_summary(pool.get_ref(), user_id)
                .await?
                .ok_or_else(|| AppError::not_found("User"))?,
        ),
        None => None,
    };

    let now = Utc::now();
    let thread = ProjectThread {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        title,
        description: non_blank(body.description.as_deref()),
        is_pinned: false,
        created_by: creator.as_ref().map(|c| c.id.clone()),
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO project_threads (id, project_id, title, description, is_pinned, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&thread.id)
    .bind(&thread.project_id)
    .bind(&thread.title)
    .bind(&thread.description)
    .bind(thread.is_pinned)
    .bind(&thread.created_by)
    .bind(thread.created_at)
    .bind(thread.updated_at)
    .execute(&mut *tx)
    .await?;
    replace_tags(&mut *tx, &thread.id, &body.tags).await?;
    tx.commit().await?;

    let tags = load_tags(pool.get_ref(), &thread.id).await?;
    Ok(HttpResponse::Created().json(ThreadDetail {
        thread,
        creator,
        tags,
        messages: Vec::new(),
    }))
}

pub async fn get_thread(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, thread_id) = path.into_inner();
    let thread = find_thread(pool.get_ref(), &project_id, &thread_id).await?;

    let creator = match &thread.created_by {
        Some(user_id) => find_user_summary(pool.get_ref(), user_id).await?,
        None => None,
    };
    let tags = load_tags(pool.get_ref(), &thread.id).await?;

    let messages = sqlx::query_as::<_, ThreadMessage>(
        "SELECT * FROM thread_messages WHERE thread_id = ? ORDER BY created_at, rowid",
    )
    .bind(&thread.id)
    .fetch_all(pool.get_ref())
    .await?;

    let mut views = Vec::with_capacity(messages.len());
    for message in messages {
        views.push(view_with_replies(pool.get_ref(), message).await?);
    }

    Ok(HttpResponse::Ok().json(ThreadDetail {
        thread,
        creator,
        tags,
        messages: views,
    }))
}

pub async fn update_thread(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateThreadRequest>,
) -> Result<HttpResponse> {
    let (project_id, thread_id) = path.into_inner();
    find_thread(pool.get_ref(), &project_id, &thread_id).await?;

    let title = match &body.title {
        Some(title) => Some(
            non_blank(Some(title)).ok_or_else(|| AppError::BadRequest("Thread title is required".to_string()))?,
        ),
        None => None,
    };

    let mut updates = Vec::new();
    let mut query = "UPDATE project_threads SET ".to_string();

    if title.is_some() {
        updates.push("title = ?");
    }
    if body.description.is_some() {
        updates.push("description = ?");
    }
    if body.is_pinned.is_some() {
        updates.push("is_pinned = ?");
    }
    updates.push("updated_at = ?");
    query.push_str(&updates.join(", "));
    query.push_str(" WHERE id = ? AND project_id = ?");

    let mut tx = pool.begin().await?;

    let mut q = sqlx::query(&query);
    if let Some(ref title) = title {
        q = q.bind(title);
    }
    if let Some(ref description) = body.description {
        q = q.bind(non_blank(description.as_deref()));
    }
    if let Some(pinned) = body.is_pinned {
        q = q.bind(pinned);
    }
    q = q.bind(Utc::now()).bind(&thread_id).bind(&project_id);
    q.execute(&mut *tx).await?;

    if let Some(tags) = &body.tags {
        replace_tags(&mut *tx, &thread_id, tags).await?;
    }
    tx.commit().await?;

    let thread = find_thread(pool.get_ref(), &project_id, &thread_id).await?;
    let creator = match &thread.created_by {
        Some(user_id) => find_user_summary(pool.get_ref(), user_id).await?,
        None => None,
    };
    let tags = load_tags(pool.get_ref(), &thread.id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "thread": thread,
        "creator": creator,
        "tags": tags
    })))
}

pub async fn delete_thread(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, thread_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM project_threads WHERE id = ? AND project_id = ?")
        .bind(&thread_id)
        .bind(&project_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Thread"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Thread deleted successfully"
    })))
}

/// Top-level messages with their replies.
pub async fn list_messages(
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    path: web::Path<(String, String)>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let (project_id, thread_id) = path.into_inner();
    let thread = find_thread(pool.get_ref(), &project_id, &thread_id).await?;
    let (page, limit, offset) = query.resolve(&config);

    let messages = sqlx::query_as::<_, ThreadMessage>(
        r#"
        SELECT * FROM thread_messages
        WHERE thread_id = ? AND parent_id IS NULL
        ORDER BY created_at, rowid
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&thread.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool.get_ref())
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM thread_messages WHERE thread_id = ? AND parent_id IS NULL",
    )
    .bind(&thread.id)
    .fetch_one(pool.get_ref())
    .await?;

    let mut views = Vec::with_capacity(messages.len());
    for message in messages {
        views.push(view_with_replies(pool.get_ref(), message).await?);
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "messages": views,
        "pagination": Pagination::new(page, limit, total)
    })))
}

pub async fn create_message(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<CreateMessageRequest>,
) -> Result<HttpResponse> {
    let (project_id, thread_id) = path.into_inner();
    let body = body.into_inner();
    let thread = find_thread(pool.get_ref(), &project_id, &thread_id).await?;

    let content = non_blank(Some(&body.content))
        .ok_or_else(|| AppError::BadRequest("Message content is required".to_string()))?;
    if find_user_summary(pool.get_ref(), &body.user_id).await?.is_none() {
        return Err(AppError::not_found("User"));
    }

    let parent_id = non_blank(body.parent_id.as_deref());
    if let Some(parent) = &parent_id {
        let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM thread_messages WHERE id = ? AND thread_id = ?")
            .bind(parent)
            .bind(&thread.id)
            .fetch_one(pool.get_ref())
            .await?;
        if found == 0 {
            return Err(AppError::BadRequest("Parent message does not belong to this thread".to_string()));
        }
    }

    let now = Utc::now();
    let message = ThreadMessage {
        id: uuid::Uuid::new_v4().to_string(),
        thread_id: thread.id.clone(),
        user_id: body.user_id,
        content,
        parent_id,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO thread_messages (id, thread_id, user_id, content, parent_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&message.id)
    .bind(&message.thread_id)
    .bind(&message.user_id)
    .bind(&message.content)
    .bind(&message.parent_id)
    .bind(message.created_at)
    .bind(message.updated_at)
    .execute(&mut *tx)
    .await?;

    for (index, attachment) in body.attachments.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO thread_message_attachments (id, message_id, filename, content_type, size, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&message.id)
        .bind(
            non_blank(attachment.filename.as_deref()).unwrap_or_else(|| format!("attachment_{}", index + 1)),
        )
        .bind(
            non_blank(attachment.content_type.as_deref())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        )
        .bind(attachment.size.unwrap_or(0).max(0))
        .bind(&attachment.url)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE project_threads SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(&thread.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(HttpResponse::Created().json(view(pool.get_ref(), message).await?))
}

/// Discussion messages across every thread of the project, grouped by day.
pub async fn project_timeline(
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let (page, limit, offset) = query.resolve(&config);

    let messages = sqlx::query_as::<_, ThreadMessage>(
        r#"
        SELECT m.* FROM thread_messages m
        JOIN project_threads t ON t.id = m.thread_id
        WHERE t.project_id = ?
        ORDER BY m.created_at DESC, m.rowid DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&project.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool.get_ref())
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM thread_messages m
        JOIN project_threads t ON t.id = m.thread_id
        WHERE t.project_id = ?
        "#,
    )
    .bind(&project.id)
    .fetch_one(pool.get_ref())
    .await?;

    let threads: HashMap<String, ThreadRef> = sqlx::query_as::<_, ThreadRef>(
        "SELECT id, title, description FROM project_threads WHERE project_id = ?",
    )
    .bind(&project.id)
    .fetch_all(pool.get_ref())
    .await?
    .into_iter()
    .map(|t| (t.id.clone(), t))
    .collect();

    let mut entries = Vec::with_capacity(messages.len());
    for message in messages {
        let parent = match &message.parent_id {
            Some(parent_id) => {
                let parent = sqlx::query_as::<_, ThreadMessage>("SELECT * FROM thread_messages WHERE id = ?")
                    .bind(parent_id)
                    .fetch_optional(pool.get_ref())
                    .await?;
                match parent {
                    Some(parent) => Some(ParentRef {
                        user: find_user_summary(pool.get_ref(), &parent.user_id).await?,
                        id: parent.id,
                        content: parent.content,
                    }),
                    None => None,
                }
            }
            None => None,
        };
        let thread = threads.get(&message.thread_id).cloned();
        entries.push(TimelineMessage {
            message: view(pool.get_ref(), message).await?,
            thread,
            parent,
        });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timeline": group_by_day(entries),
        "pagination": Pagination::new(page, limit, total)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, day: u32, hour: u32) -> TimelineMessage {
        let at = Utc.with_ymd_and_hms(2024, 11, day, hour, 0, 0).unwrap();
        TimelineMessage {
            message: MessageView {
                message: ThreadMessage {
                    id: id.to_string(),
                    thread_id: "t".to_string(),
                    user_id: "u".to_string(),
                    content: "hi".to_string(),
                    parent_id: None,
                    created_at: at,
                    updated_at: at,
                },
                user: None,
                attachments: Vec::new(),
                replies: Vec::new(),
            },
            thread: None,
            parent: None,
        }
    }

    #[test]
    fn test_group_by_day_orders_days_and_messages() {
        let grouped = group_by_day(vec![entry("late", 15, 18), entry("next", 16, 9), entry("early", 15, 8)]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].date, "2024-11-16");
        assert_eq!(grouped[1].date, "2024-11-15");
        let ids: Vec<_> = grouped[1].messages.iter().map(|m| m.message.message.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_tag_color_is_stable() {
        assert_eq!(tag_color("backend"), tag_color("backend"));
        assert!(TAG_COLORS.contains(&tag_color("design")));
    }
}
