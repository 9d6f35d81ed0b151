use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::models::{EmailMessage, EventType, TimelineEvent, TimelineView};
use crate::services::timeline::{self, NewEvent};
use crate::utils::fields::{deserialize_some, non_blank};

/// Event fields as accepted on create and on timeline event replacement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub message_id: Option<String>,
    #[serde(alias = "type")]
    pub event_type: Option<EventType>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub message_id: Option<Option<String>>,
    #[serde(alias = "type")]
    pub event_type: Option<EventType>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub metadata: Option<Option<serde_json::Value>>,
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    #[serde(default)]
    pub event_ids: Vec<String>,
}

pub(crate) async fn require_timeline(pool: &SqlitePool, timeline_id: &str) -> Result<TimelineView> {
    timeline::find_timeline(pool, timeline_id)
        .await?
        .ok_or_else(|| AppError::not_found("Timeline"))
}

/// The message must be part of the thread the timeline summarizes.
async fn thread_message(pool: &SqlitePool, thread_id: &str, message_id: &str) -> Result<EmailMessage> {
    sqlx::query_as::<_, EmailMessage>("SELECT * FROM email_messages WHERE id = ? AND thread_id = ?")
        .bind(message_id)
        .bind(thread_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::BadRequest("Message does not belong to this timeline's thread".to_string()))
}

/// Fill event defaults from the linked message, if any.
pub(crate) async fn resolve_event(pool: &SqlitePool, thread_id: &str, input: &EventInput) -> Result<NewEvent> {
    let message = match non_blank(input.message_id.as_deref()) {
        Some(id) => Some(thread_message(pool, thread_id, &id).await?),
        None => None,
    };

    let event_type = input
        .event_type
        .unwrap_or_else(|| message.as_ref().map(timeline::classify).unwrap_or(EventType::Custom));
    let title = non_blank(input.title.as_deref()).unwrap_or_else(|| timeline::event_title(event_type).to_string());
    let timestamp = input
        .timestamp
        .or_else(|| message.as_ref().map(|m| m.timestamp))
        .unwrap_or_else(Utc::now);

    Ok(NewEvent {
        message_id: message.map(|m| m.id),
        event_type,
        title,
        description: non_blank(input.description.as_deref()),
        timestamp,
        metadata: input.metadata.clone(),
    })
}

async fn touch(conn: &mut sqlx::SqliteConnection, timeline_id: &str) -> Result<()> {
    sqlx::query("UPDATE timeline_views SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(timeline_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn event_response(pool: &SqlitePool, timeline_id: &str, event_id: &str) -> Result<HttpResponse> {
    let event = timeline::load_event(pool, timeline_id, event_id)
        .await?
        .ok_or_else(|| AppError::not_found("Timeline event"))?;
    Ok(HttpResponse::Ok().json(event))
}

pub async fn list_events(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let timeline = require_timeline(pool.get_ref(), &path.into_inner()).await?;
    let events = timeline::load_events(pool.get_ref(), &timeline.id).await?;
    Ok(HttpResponse::Ok().json(events))
}

/// Appends, or inserts at `order` and shifts later events down.
pub async fn create_event(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<EventInput>,
) -> Result<HttpResponse> {
    let timeline = require_timeline(pool.get_ref(), &path.into_inner()).await?;
    let event = resolve_event(pool.get_ref(), &timeline.thread_id, &body).await?;

    let mut tx = pool.begin().await?;
    let mut ids = timeline::event_ids(&mut *tx, &timeline.id).await?;
    let index = timeline::insert_index(ids.len(), body.order);

    let stored = timeline::insert_event(&mut *tx, &timeline.id, &event, index as i64 + 1).await?;
    ids.insert(index, stored.id.clone());
    timeline::write_order(&mut *tx, &ids).await?;
    touch(&mut *tx, &timeline.id).await?;
    tx.commit().await?;

    let created = timeline::load_event(pool.get_ref(), &timeline.id, &stored.id)
        .await?
        .ok_or_else(|| AppError::not_found("Timeline event"))?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn get_event(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (timeline_id, event_id) = path.into_inner();
    require_timeline(pool.get_ref(), &timeline_id).await?;
    event_response(pool.get_ref(), &timeline_id, &event_id).await
}

pub async fn update_event(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateEventRequest>,
) -> Result<HttpResponse> {
    let (timeline_id, event_id) = path.into_inner();
    let timeline = require_timeline(pool.get_ref(), &timeline_id).await?;
    let body = body.into_inner();

    let mut event = sqlx::query_as::<_, TimelineEvent>("SELECT * FROM timeline_events WHERE id = ? AND timeline_id = ?")
        .bind(&event_id)
        .bind(&timeline.id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("Timeline event"))?;

    if let Some(message_id) = body.message_id {
        event.message_id = match non_blank(message_id.as_deref()) {
            Some(id) => Some(thread_message(pool.get_ref(), &timeline.thread_id, &id).await?.id),
            None => None,
        };
    }
    if let Some(event_type) = body.event_type {
        event.event_type = event_type;
    }
    if let Some(title) = &body.title {
        event.title = non_blank(Some(title)).ok_or_else(|| AppError::BadRequest("Event title is required".to_string()))?;
    }
    if let Some(description) = body.description {
        event.description = non_blank(description.as_deref());
    }
    if let Some(timestamp) = body.timestamp {
        event.timestamp = timestamp;
    }
    if let Some(metadata) = body.metadata {
        event.metadata = metadata.map(Json);
    }

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        UPDATE timeline_events
        SET message_id = ?, event_type = ?, title = ?, description = ?, timestamp = ?, metadata = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&event.message_id)
    .bind(event.event_type)
    .bind(&event.title)
    .bind(&event.description)
    .bind(event.timestamp)
    .bind(&event.metadata)
    .bind(Utc::now())
    .bind(&event.id)
    .execute(&mut *tx)
    .await?;

    if let Some(order) = body.order {
        let mut ids = timeline::event_ids(&mut *tx, &timeline.id).await?;
        if timeline::move_to(&mut ids, &event.id, order) {
            timeline::write_order(&mut *tx, &ids).await?;
        }
    }
    touch(&mut *tx, &timeline.id).await?;
    tx.commit().await?;

    event_response(pool.get_ref(), &timeline.id, &event.id).await
}

/// Deletes the event and closes the gap in the ordering.
pub async fn delete_event(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (timeline_id, event_id) = path.into_inner();
    let timeline = require_timeline(pool.get_ref(), &timeline_id).await?;

    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM timeline_events WHERE id = ? AND timeline_id = ?")
        .bind(&event_id)
        .bind(&timeline.id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Timeline event"));
    }

    let ids = timeline::event_ids(&mut *tx, &timeline.id).await?;
    timeline::write_order(&mut *tx, &ids).await?;
    touch(&mut *tx, &timeline.id).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Event deleted successfully"
    })))
}

pub async fn reorder_events(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<ReorderRequest>,
) -> Result<HttpResponse> {
    let timeline = require_timeline(pool.get_ref(), &path.into_inner()).await?;

    let mut tx = pool.begin().await?;
    let current = timeline::event_ids(&mut *tx, &timeline.id).await?;
    timeline::check_permutation(&current, &body.event_ids).map_err(AppError::BadRequest)?;
    timeline::write_order(&mut *tx, &body.event_ids).await?;
    touch(&mut *tx, &timeline.id).await?;
    tx.commit().await?;

    let events = timeline::load_events(pool.get_ref(), &timeline.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Events reordered successfully",
        "events": events
    })))
}
