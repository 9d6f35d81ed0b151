use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::handlers::projects::find_project;
use crate::models::{EmailMessage, EmailThread, ParticipantRole, TagInput};
use crate::services::email_import::{insert_participants, insert_tags};
use crate::services::email_threads::{self, ThreadSummary};
use crate::services::normalize::{normalize_address, NormalizedParticipant};
use crate::services::participants::resolve_participants;
use crate::services::thread_match::find_by_key;
use crate::utils::fields::{deserialize_some, non_blank};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListThreadsQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantInput {
    pub email: String,
    pub name: Option<String>,
    pub role: Option<ParticipantRole>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub subject: Option<String>,
    #[serde(alias = "threadId")]
    pub thread_key: Option<String>,
    pub project_id: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantInput>,
    #[serde(default)]
    pub tags: Vec<TagInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThreadRequest {
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub project_id: Option<Option<String>>,
    pub tags: Option<Vec<TagInput>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListItem {
    #[serde(flatten)]
    pub summary: ThreadSummary,
    pub first_message: Option<EmailMessage>,
}

async fn detail_response(pool: &SqlitePool, thread_id: &str) -> Result<HttpResponse> {
    let detail = email_threads::load_detail(pool, thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn list_threads(pool: web::Data<SqlitePool>, query: web::Query<ListThreadsQuery>) -> Result<HttpResponse> {
    let threads = sqlx::query_as::<_, EmailThread>(
        r#"
        SELECT * FROM email_threads
        WHERE (? IS NULL OR project_id = ?)
        ORDER BY updated_at DESC
        "#,
    )
    .bind(&query.project_id)
    .bind(&query.project_id)
    .fetch_all(pool.get_ref())
    .await?;

    let mut items = Vec::with_capacity(threads.len());
    for thread in threads {
        let first_message = sqlx::query_as::<_, EmailMessage>(
            "SELECT * FROM email_messages WHERE thread_id = ? ORDER BY timestamp, rowid LIMIT 1",
        )
        .bind(&thread.id)
        .fetch_optional(pool.get_ref())
        .await?;
        let summary = email_threads::load_summary(pool.get_ref(), thread).await?;
        items.push(ThreadListItem { summary, first_message });
    }

    Ok(HttpResponse::Ok().json(items))
}

pub async fn create_thread(pool: web::Data<SqlitePool>, body: web::Json<CreateThreadRequest>) -> Result<HttpResponse> {
    let body = body.into_inner();

    let subject = non_blank(body.subject.as_deref())
        .ok_or_else(|| AppError::BadRequest("Subject is required".to_string()))?;

    if let Some(project_id) = non_blank(body.project_id.as_deref()) {
        find_project(pool.get_ref(), &project_id).await?;
    }

    let thread_key = non_blank(body.thread_key.as_deref())
        .unwrap_or_else(|| format!("manual_{}", uuid::Uuid::new_v4().simple()));
    if let Some(existing) = find_by_key(pool.get_ref(), &thread_key).await? {
        return Err(AppError::conflict("Email thread already exists", Some(existing.id)));
    }

    let mut participants: Vec<NormalizedParticipant> = Vec::new();
    for input in &body.participants {
        let email = normalize_address(&input.email);
        if email.is_empty() || participants.iter().any(|p| p.email == email) {
            continue;
        }
        participants.push(NormalizedParticipant {
            email,
            name: non_blank(input.name.as_deref()),
            role: input.role.unwrap_or(ParticipantRole::To),
        });
    }
    let resolved = resolve_participants(pool.get_ref(), &participants).await;

    let now = Utc::now();
    let thread_id = uuid::Uuid::new_v4().to_string();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO email_threads (id, thread_key, subject, project_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&thread_id)
    .bind(&thread_key)
    .bind(&subject)
    .bind(non_blank(body.project_id.as_deref()))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    insert_participants(&mut *tx, &thread_id, &resolved).await?;
    insert_tags(&mut *tx, &thread_id, &body.tags).await?;
    tx.commit().await?;

    log::info!("Created email thread {} ({})", thread_id, thread_key);

    let detail = email_threads::load_detail(pool.get_ref(), &thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;
    Ok(HttpResponse::Created().json(detail))
}

pub async fn get_thread(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    detail_response(pool.get_ref(), &path.into_inner()).await
}

pub async fn update_thread(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<UpdateThreadRequest>,
) -> Result<HttpResponse> {
    let thread_id = path.into_inner();
    let mut thread = email_threads::find_thread(pool.get_ref(), &thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;

    if let Some(subject) = &body.subject {
        thread.subject =
            non_blank(Some(subject)).ok_or_else(|| AppError::BadRequest("Subject is required".to_string()))?;
    }
    if let Some(project_id) = &body.project_id {
        let project_id = non_blank(project_id.as_deref());
        if let Some(id) = &project_id {
            find_project(pool.get_ref(), id).await?;
        }
        thread.project_id = project_id;
    }

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE email_threads SET subject = ?, project_id = ?, updated_at = ? WHERE id = ?")
        .bind(&thread.subject)
        .bind(&thread.project_id)
        .bind(Utc::now())
        .bind(&thread.id)
        .execute(&mut *tx)
        .await?;

    if let Some(tags) = &body.tags {
        sqlx::query("DELETE FROM thread_tags WHERE thread_id = ?")
            .bind(&thread.id)
            .execute(&mut *tx)
            .await?;
        insert_tags(&mut *tx, &thread.id, tags).await?;
    }
    tx.commit().await?;

    detail_response(pool.get_ref(), &thread.id).await
}

/// Removes the thread with its messages, participants, tags and timeline.
pub async fn delete_thread(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let thread_id = path.into_inner();

    let result = sqlx::query("DELETE FROM email_threads WHERE id = ?")
        .bind(&thread_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Email thread"));
    }

    log::info!("Deleted email thread {}", thread_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Email thread deleted successfully"
    })))
}
