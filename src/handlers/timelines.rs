use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{is_unique_violation, AppError, Result};
use crate::handlers::timeline_events::{require_timeline, resolve_event, EventInput};
use crate::models::TimelineView;
use crate::services::email_threads;
use crate::services::timeline::{self, Generated, NewEvent, TimelineSettings};
use crate::utils::fields::{deserialize_some, non_blank};

const TIMELINE_EXISTS: &str = "Timeline already exists for this thread";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTimelinesQuery {
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimelineRequest {
    pub thread_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub events: Vec<EventInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTimelineRequest {
    pub thread_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTimelineRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub is_public: Option<bool>,
    pub events: Option<Vec<EventInput>>,
}

async fn detail_response(pool: &SqlitePool, timeline_id: &str, created: bool) -> Result<HttpResponse> {
    let detail = timeline::load_detail(pool, timeline_id)
        .await?
        .ok_or_else(|| AppError::not_found("Timeline"))?;
    if created {
        Ok(HttpResponse::Created().json(detail))
    } else {
        Ok(HttpResponse::Ok().json(detail))
    }
}

async fn resolve_events(pool: &SqlitePool, thread_id: &str, inputs: &[EventInput]) -> Result<Vec<NewEvent>> {
    let mut events = Vec::with_capacity(inputs.len());
    for input in inputs {
        events.push(resolve_event(pool, thread_id, input).await?);
    }
    Ok(events)
}

pub async fn list_timelines(pool: web::Data<SqlitePool>, query: web::Query<ListTimelinesQuery>) -> Result<HttpResponse> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM timeline_views WHERE (? IS NULL OR thread_id = ?) ORDER BY updated_at DESC",
    )
    .bind(&query.thread_id)
    .bind(&query.thread_id)
    .fetch_all(pool.get_ref())
    .await?;

    let mut timelines = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(detail) = timeline::load_detail(pool.get_ref(), &id).await? {
            timelines.push(detail);
        }
    }

    Ok(HttpResponse::Ok().json(timelines))
}

/// Create a timeline from caller-supplied events, ordered as given.
pub async fn create_timeline(
    pool: web::Data<SqlitePool>,
    body: web::Json<CreateTimelineRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let thread = email_threads::find_thread(pool.get_ref(), &body.thread_id)
        .await?
        .ok_or_else(|| AppError::not_found("Email thread"))?;

    if timeline::find_by_thread(pool.get_ref(), &thread.id).await?.is_some() {
        return Err(AppError::conflict(TIMELINE_EXISTS, None));
    }

    let events = resolve_events(pool.get_ref(), &thread.id, &body.events).await?;
    let title = non_blank(body.title.as_deref()).unwrap_or_else(|| format!("{} Timeline", thread.subject));
    let description = non_blank(body.description.as_deref());

    let created = timeline::create_timeline(
        pool.get_ref(),
        &thread.id,
        &title,
        description.as_deref(),
        body.is_public,
        &events,
    )
    .await;

    let view = match created {
        Ok(view) => view,
        Err(e) if is_unique_violation(&e) => return Err(AppError::conflict(TIMELINE_EXISTS, None)),
        Err(e) => return Err(e.into()),
    };

    log::info!("Created timeline {} for thread {}", view.id, thread.id);
    detail_response(pool.get_ref(), &view.id, true).await
}

/// Build a timeline from the thread's messages. Asking again for the same
/// thread returns the existing timeline with 200.
pub async fn generate_timeline(
    pool: web::Data<SqlitePool>,
    body: web::Json<GenerateTimelineRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let settings = TimelineSettings {
        title: body.title,
        description: body.description,
        is_public: body.is_public,
    };

    let generated = timeline::generate_for_thread(pool.get_ref(), &body.thread_id, settings).await?;
    let detail = timeline::load_detail(pool.get_ref(), &generated.timeline().id)
        .await?
        .ok_or_else(|| AppError::not_found("Timeline"))?;

    match generated {
        Generated::Created { events, .. } => Ok(HttpResponse::Created().json(serde_json::json!({
            "success": true,
            "message": "Timeline generated successfully",
            "timeline": detail,
            "generatedEvents": events
        }))),
        Generated::Existing(_) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": TIMELINE_EXISTS,
            "timeline": detail,
            "generatedEvents": 0
        }))),
    }
}

pub async fn get_timeline(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    detail_response(pool.get_ref(), &path.into_inner(), false).await
}

/// Partial update. A supplied `events` list replaces every event.
pub async fn update_timeline(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<UpdateTimelineRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let mut view: TimelineView = require_timeline(pool.get_ref(), &path.into_inner()).await?;

    if let Some(title) = &body.title {
        view.title =
            non_blank(Some(title)).ok_or_else(|| AppError::BadRequest("Timeline title is required".to_string()))?;
    }
    if let Some(description) = body.description {
        view.description = non_blank(description.as_deref());
    }
    if let Some(is_public) = body.is_public {
        view.is_public = is_public;
    }

    let events = match &body.events {
        Some(inputs) => Some(resolve_events(pool.get_ref(), &view.thread_id, inputs).await?),
        None => None,
    };

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE timeline_views SET title = ?, description = ?, is_public = ?, updated_at = ? WHERE id = ?")
        .bind(&view.title)
        .bind(&view.description)
        .bind(view.is_public)
        .bind(Utc::now())
        .bind(&view.id)
        .execute(&mut *tx)
        .await?;

    if let Some(events) = events {
        sqlx::query("DELETE FROM timeline_events WHERE timeline_id = ?")
            .bind(&view.id)
            .execute(&mut *tx)
            .await?;
        for (index, event) in events.iter().enumerate() {
            timeline::insert_event(&mut *tx, &view.id, event, index as i64 + 1).await?;
        }
    }
    tx.commit().await?;

    detail_response(pool.get_ref(), &view.id, false).await
}

pub async fn delete_timeline(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let timeline_id = path.into_inner();

    let result = sqlx::query("DELETE FROM timeline_views WHERE id = ?")
        .bind(&timeline_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Timeline"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Timeline deleted successfully"
    })))
}
