use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{EmailThread, TagInput};
use crate::services::email_threads::{self, MessageDetail};
use crate::services::normalize::{self, ImportSource, NormalizedImport, NormalizedMessage};
use crate::services::participants::{self, ResolvedParticipant};
use crate::services::thread_match::{self, ThreadMatch};
use crate::services::timeline::{self, TimelineDetail, TimelineSettings};
use crate::utils::sanitize::{sanitize_message_html, strip_html_tags};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default)]
    pub auto_generate_timeline: bool,
    #[serde(default)]
    pub allow_duplicate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub source: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedThread {
    #[serde(flatten)]
    pub thread: EmailThread,
    pub participants: Vec<crate::models::EmailParticipant>,
    pub tags: Vec<crate::models::ThreadTag>,
    pub messages: Vec<MessageDetail>,
    pub message_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
    pub thread: ImportedThread,
    pub timeline: Option<TimelineDetail>,
    pub imported_messages: usize,
}

pub struct ImportService {
    pool: SqlitePool,
}

impl ImportService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Normalize, deduplicate and store an import, then optionally build
    /// its timeline.
    pub async fn import(&self, request: ImportRequest) -> Result<ImportOutcome> {
        let source = ImportSource::parse(&request.source)
            .ok_or_else(|| AppError::BadRequest("Unsupported import source".to_string()))?;

        let import = normalize::normalize(source, request.data, Utc::now())?;

        let errors = normalize::validate(&import);
        if !errors.is_empty() {
            return Err(AppError::validation("Invalid email data", errors));
        }

        if let Some(project_id) = &import.project_id {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM projects WHERE id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(AppError::not_found("Project"));
            }
        }

        let existing = thread_match::find_existing_thread(&self.pool, &import, request.options.allow_duplicate).await?;

        let target = match existing {
            Some(found) if !request.options.allow_duplicate => {
                log::info!("Rejecting duplicate import of thread {}", found.thread().id);
                return Err(AppError::conflict(
                    "Email thread already exists",
                    Some(found.thread().id.clone()),
                ));
            }
            Some(ThreadMatch::ExactKey(thread)) => Some(thread),
            Some(ThreadMatch::Similar(_)) | None => None,
        };

        let resolved = participants::resolve_participants(&self.pool, &import.participants).await;

        let (thread_id, imported) = self.store(&import, target, &resolved).await?;

        log::info!(
            "Imported {} message(s) into thread {} from {}",
            imported,
            thread_id,
            request.source
        );

        let timeline = if request.options.auto_generate_timeline {
            self.generate_timeline(&thread_id).await
        } else {
            None
        };

        let thread = email_threads::find_thread(&self.pool, &thread_id)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Imported thread {} vanished", thread_id)))?;
        let participants = email_threads::load_participants(&self.pool, &thread_id).await?;
        let tags = email_threads::load_tags(&self.pool, &thread_id).await?;
        let messages = email_threads::load_message_details(&self.pool, &thread_id).await?;

        Ok(ImportOutcome {
            success: true,
            message: "Email thread imported successfully".to_string(),
            thread: ImportedThread {
                thread,
                participants,
                tags,
                message_count: messages.len() as i64,
                messages,
            },
            timeline,
            imported_messages: imported,
        })
    }

    /// Timeline failures after a successful import are logged, not returned.
    async fn generate_timeline(&self, thread_id: &str) -> Option<TimelineDetail> {
        let generated = match timeline::generate_for_thread(&self.pool, thread_id, TimelineSettings::default()).await {
            Ok(generated) => generated,
            Err(e) => {
                log::warn!("Timeline generation failed for thread {}: {}", thread_id, e);
                return None;
            }
        };

        match timeline::load_detail(&self.pool, &generated.timeline().id).await {
            Ok(detail) => detail,
            Err(e) => {
                log::warn!("Could not load timeline for thread {}: {}", thread_id, e);
                None
            }
        }
    }

    /// Write the thread and everything under it in one transaction. Returns
    /// the thread id and the number of messages written.
    async fn store(
        &self,
        import: &NormalizedImport,
        target: Option<EmailThread>,
        resolved: &[ResolvedParticipant],
    ) -> Result<(String, usize)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let thread_id = match target {
            Some(thread) => {
                sqlx::query("UPDATE email_threads SET subject = ?, project_id = COALESCE(?, project_id), updated_at = ? WHERE id = ?")
                    .bind(&import.subject)
                    .bind(&import.project_id)
                    .bind(now)
                    .bind(&thread.id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM email_participants WHERE thread_id = ?")
                    .bind(&thread.id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM thread_tags WHERE thread_id = ?")
                    .bind(&thread.id)
                    .execute(&mut *tx)
                    .await?;
                log::debug!("Merging import into existing thread {}", thread.id);
                thread.id
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let key = import
                    .thread_key
                    .clone()
                    .unwrap_or_else(|| format!("imported_{}", uuid::Uuid::new_v4().simple()));
                sqlx::query(
                    r#"
                    INSERT INTO email_threads (id, thread_key, subject, project_id, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&key)
                .bind(&import.subject)
                .bind(&import.project_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        insert_participants(&mut *tx, &thread_id, resolved).await?;
        insert_tags(&mut *tx, &thread_id, &import.tags).await?;

        // External message id -> stored id, seeded with what the thread
        // already holds so replies can point at earlier imports.
        let mut stored_ids: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
            "SELECT message_id, id FROM email_messages WHERE thread_id = ?",
        )
        .bind(&thread_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let mut inserted = Vec::with_capacity(import.messages.len());
        for message in &import.messages {
            let id = insert_message(&mut *tx, &thread_id, message).await?;
            stored_ids.insert(message.message_id.clone(), id.clone());
            inserted.push((id, message));
        }

        for (id, message) in &inserted {
            let Some(parent) = message.parent_message_id.as_ref().and_then(|p| stored_ids.get(p)) else {
                continue;
            };
            if parent == id {
                continue;
            }
            sqlx::query("UPDATE email_messages SET parent_message_id = ? WHERE id = ?")
                .bind(parent)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok((thread_id, inserted.len()))
    }
}

pub async fn insert_participants(
    conn: &mut SqliteConnection,
    thread_id: &str,
    participants: &[ResolvedParticipant],
) -> Result<()> {
    let now = Utc::now();
    for participant in participants {
        sqlx::query(
            r#"
            INSERT INTO email_participants (id, thread_id, email, name, role, user_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(thread_id)
        .bind(&participant.email)
        .bind(&participant.name)
        .bind(participant.role)
        .bind(&participant.user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_tags(conn: &mut SqliteConnection, thread_id: &str, tags: &[TagInput]) -> Result<()> {
    let now = Utc::now();
    for tag in tags {
        if tag.name.trim().is_empty() {
            continue;
        }
        sqlx::query("INSERT INTO thread_tags (id, thread_id, name, color, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(thread_id)
            .bind(tag.name.trim())
            .bind(&tag.color)
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_message(conn: &mut SqliteConnection, thread_id: &str, message: &NormalizedMessage) -> Result<String> {
    let now = Utc::now();
    let id = uuid::Uuid::new_v4().to_string();
    let body = sanitize_message_html(&message.body);
    let text_body = message
        .text_body
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| strip_html_tags(&message.body));

    sqlx::query(
        r#"
        INSERT INTO email_messages
            (id, thread_id, message_id, from_address, to_addresses, cc_addresses, bcc_addresses,
             subject, body, text_body, timestamp, is_read, is_forwarded, is_replied, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(thread_id)
    .bind(&message.message_id)
    .bind(&message.from)
    .bind(Json(&message.to))
    .bind(Json(&message.cc))
    .bind(Json(&message.bcc))
    .bind(&message.subject)
    .bind(&body)
    .bind(&text_body)
    .bind(message.timestamp.unwrap_or(now))
    .bind(message.is_read)
    .bind(message.is_forwarded)
    .bind(message.is_replied)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    for attachment in &message.attachments {
        sqlx::query(
            r#"
            INSERT INTO email_attachments (id, message_id, filename, content_type, size, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&id)
        .bind(&attachment.filename)
        .bind(&attachment.content_type)
        .bind(attachment.size)
        .bind(&attachment.url)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(id)
}
