use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::config::Config;
use crate::error::{is_unique_violation, AppError, Result};
use crate::handlers::projects::{find_project, find_user_summary};
use crate::handlers::Pagination;
use crate::models::{TimeEntry, UserSummary};
use crate::utils::fields::{deserialize_some, non_blank, page_offset, page_params};

const RUNNING_TIMER_EXISTS: &str = "User already has a running timer";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTimeEntriesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub is_running: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimeEntryRequest {
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub category_id: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub is_running: Option<bool>,
    pub billable: Option<bool>,
    pub hourly_rate: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTimeEntryRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub task_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub category_id: Option<Option<String>>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub duration: Option<Option<i64>>,
    pub is_running: Option<bool>,
    pub billable: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub hourly_rate: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearRunningRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryDetail {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub user: Option<UserSummary>,
    pub category: Option<CategorySummary>,
    pub task: Option<TaskRef>,
}

/// Whole seconds between two instants, never negative.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}

async fn detail(pool: &SqlitePool, entry: TimeEntry) -> Result<TimeEntryDetail> {
    let user = find_user_summary(pool, &entry.user_id).await?;
    let category = match &entry.category_id {
        Some(id) => {
            sqlx::query_as::<_, CategorySummary>("SELECT id, name, color FROM time_entry_categories WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };
    let task = match &entry.task_id {
        Some(id) => {
            sqlx::query_as::<_, TaskRef>("SELECT id, title FROM tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    Ok(TimeEntryDetail {
        entry,
        user,
        category,
        task,
    })
}

async fn find_entry(pool: &SqlitePool, project_id: &str, entry_id: &str) -> Result<TimeEntry> {
    sqlx::query_as::<_, TimeEntry>("SELECT * FROM time_entries WHERE id = ? AND project_id = ?")
        .bind(entry_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Time entry"))
}

async fn has_other_running(pool: &SqlitePool, user_id: &str, except: Option<&str>) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM time_entries WHERE user_id = ? AND is_running = 1 AND id != COALESCE(?, '')",
    )
    .bind(user_id)
    .bind(except)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Task and category references must point into the same project.
async fn check_refs(
    pool: &SqlitePool,
    project_id: &str,
    task_id: Option<&str>,
    category_id: Option<&str>,
) -> Result<()> {
    if let Some(task_id) = task_id {
        let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE id = ? AND project_id = ?")
            .bind(task_id)
            .bind(project_id)
            .fetch_one(pool)
            .await?;
        if found == 0 {
            return Err(AppError::BadRequest("Task does not belong to this project".to_string()));
        }
    }
    if let Some(category_id) = category_id {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM time_entry_categories WHERE id = ? AND project_id = ?",
        )
        .bind(category_id)
        .bind(project_id)
        .fetch_one(pool)
        .await?;
        if found == 0 {
            return Err(AppError::BadRequest("Category does not belong to this project".to_string()));
        }
    }
    Ok(())
}

fn running_conflict(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::BadRequest(RUNNING_TIMER_EXISTS.to_string())
    } else {
        e.into()
    }
}

pub async fn list_time_entries(
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<ListTimeEntriesQuery>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let (page, limit) = page_params(query.page, query.limit, config.default_page_size, config.max_page_size);
    let offset = page_offset(page, limit);

    let entries = sqlx::query_as::<_, TimeEntry>(
        r#"
        SELECT * FROM time_entries
        WHERE project_id = ? AND (? IS NULL OR is_running = ?)
        ORDER BY start_time DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&project.id)
    .bind(query.is_running)
    .bind(query.is_running)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool.get_ref())
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM time_entries WHERE project_id = ? AND (? IS NULL OR is_running = ?)",
    )
    .bind(&project.id)
    .bind(query.is_running)
    .bind(query.is_running)
    .fetch_one(pool.get_ref())
    .await?;

    let mut details = Vec::with_capacity(entries.len());
    for entry in entries {
        details.push(detail(pool.get_ref(), entry).await?);
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timeEntries": details,
        "pagination": Pagination::new(page, limit, total)
    })))
}

pub async fn get_time_entry(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, entry_id) = path.into_inner();
    let entry = find_entry(pool.get_ref(), &project_id, &entry_id).await?;
    Ok(HttpResponse::Ok().json(detail(pool.get_ref(), entry).await?))
}

pub async fn create_time_entry(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<CreateTimeEntryRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    let description = non_blank(body.description.as_deref());
    let user_id = non_blank(body.user_id.as_deref());
    let (Some(description), Some(start_time), Some(user_id)) = (description, body.start_time, user_id) else {
        return Err(AppError::BadRequest(
            "Description, start time, and user ID are required".to_string(),
        ));
    };

    if find_user_summary(pool.get_ref(), &user_id).await?.is_none() {
        return Err(AppError::not_found("User"));
    }
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let task_id = non_blank(body.task_id.as_deref());
    let category_id = non_blank(body.category_id.as_deref());
    check_refs(pool.get_ref(), &project.id, task_id.as_deref(), category_id.as_deref()).await?;

    let is_running = body.is_running.unwrap_or(false);
    if is_running && has_other_running(pool.get_ref(), &user_id, None).await? {
        return Err(AppError::BadRequest(RUNNING_TIMER_EXISTS.to_string()));
    }

    let end_time = if is_running { None } else { body.end_time };
    let duration = match (body.duration, end_time) {
        (Some(duration), _) => Some(duration),
        (None, Some(end)) => Some(elapsed_seconds(start_time, end)),
        (None, None) => None,
    };

    let now = Utc::now();
    let entry = TimeEntry {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        task_id,
        user_id,
        category_id,
        description,
        start_time,
        end_time,
        duration,
        is_running,
        billable: body.billable.unwrap_or(true),
        hourly_rate: body.hourly_rate,
        notes: non_blank(body.notes.as_deref()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO time_entries
            (id, project_id, task_id, user_id, category_id, description, start_time, end_time, duration,
             is_running, billable, hourly_rate, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.project_id)
    .bind(&entry.task_id)
    .bind(&entry.user_id)
    .bind(&entry.category_id)
    .bind(&entry.description)
    .bind(entry.start_time)
    .bind(entry.end_time)
    .bind(entry.duration)
    .bind(entry.is_running)
    .bind(entry.billable)
    .bind(entry.hourly_rate)
    .bind(&entry.notes)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(pool.get_ref())
    .await
    .map_err(running_conflict)?;

    log::info!("Created time entry {} for user {}", entry.id, entry.user_id);
    Ok(HttpResponse::Created().json(detail(pool.get_ref(), entry).await?))
}

pub async fn update_time_entry(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateTimeEntryRequest>,
) -> Result<HttpResponse> {
    let (project_id, entry_id) = path.into_inner();
    let body = body.into_inner();
    let mut entry = find_entry(pool.get_ref(), &project_id, &entry_id).await?;
    let was_running = entry.is_running;

    if let Some(task_id) = body.task_id {
        entry.task_id = non_blank(task_id.as_deref());
    }
    if let Some(category_id) = body.category_id {
        entry.category_id = non_blank(category_id.as_deref());
    }
    check_refs(
        pool.get_ref(),
        &project_id,
        entry.task_id.as_deref(),
        entry.category_id.as_deref(),
    )
    .await?;

    if let Some(description) = non_blank(body.description.as_deref()) {
        entry.description = description;
    }
    if let Some(start_time) = body.start_time {
        entry.start_time = start_time;
    }
    if let Some(billable) = body.billable {
        entry.billable = billable;
    }
    if let Some(rate) = body.hourly_rate {
        entry.hourly_rate = rate;
    }
    if let Some(notes) = body.notes {
        entry.notes = non_blank(notes.as_deref());
    }

    let end_supplied = body.end_time.is_some();
    let duration_supplied = body.duration.is_some();
    if let Some(end_time) = body.end_time {
        entry.end_time = end_time;
    }
    if let Some(duration) = body.duration {
        entry.duration = duration;
    }

    if let Some(running) = body.is_running {
        if running && !was_running && has_other_running(pool.get_ref(), &entry.user_id, Some(&entry.id)).await? {
            return Err(AppError::BadRequest(RUNNING_TIMER_EXISTS.to_string()));
        }
        entry.is_running = running;

        // Stopping a timer closes it now unless the caller set the end.
        if !running && was_running && !end_supplied {
            entry.end_time = Some(Utc::now());
        }
        if running {
            entry.end_time = None;
        }
    }

    if !duration_supplied {
        if let Some(end) = entry.end_time {
            if end_supplied || (was_running && !entry.is_running) {
                entry.duration = Some(elapsed_seconds(entry.start_time, end));
            }
        }
    }
    entry.updated_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE time_entries
        SET task_id = ?, category_id = ?, description = ?, start_time = ?, end_time = ?, duration = ?,
            is_running = ?, billable = ?, hourly_rate = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&entry.task_id)
    .bind(&entry.category_id)
    .bind(&entry.description)
    .bind(entry.start_time)
    .bind(entry.end_time)
    .bind(entry.duration)
    .bind(entry.is_running)
    .bind(entry.billable)
    .bind(entry.hourly_rate)
    .bind(&entry.notes)
    .bind(entry.updated_at)
    .bind(&entry.id)
    .execute(pool.get_ref())
    .await
    .map_err(running_conflict)?;

    Ok(HttpResponse::Ok().json(detail(pool.get_ref(), entry).await?))
}

pub async fn delete_time_entry(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, entry_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM time_entries WHERE id = ? AND project_id = ?")
        .bind(&entry_id)
        .bind(&project_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Time entry"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Time entry deleted successfully"
    })))
}

/// Stop every running timer of a user within the project.
pub async fn clear_running(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<ClearRunningRequest>,
) -> Result<HttpResponse> {
    let project_id = path.into_inner();
    let user_id = non_blank(body.user_id.as_deref())
        .ok_or_else(|| AppError::BadRequest("User ID is required".to_string()))?;

    let running = sqlx::query_as::<_, TimeEntry>(
        "SELECT * FROM time_entries WHERE project_id = ? AND user_id = ? AND is_running = 1",
    )
    .bind(&project_id)
    .bind(&user_id)
    .fetch_all(pool.get_ref())
    .await?;

    let now = Utc::now();
    for timer in &running {
        sqlx::query(
            "UPDATE time_entries SET is_running = 0, end_time = ?, duration = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(elapsed_seconds(timer.start_time, now))
        .bind(now)
        .bind(&timer.id)
        .execute(pool.get_ref())
        .await?;
    }

    log::info!("Cleared {} running timer(s) for user {} in project {}", running.len(), user_id, project_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Cleared {} running timer(s)", running.len()),
        "count": running.len()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_elapsed_seconds() {
        let start = Utc::now();
        assert_eq!(elapsed_seconds(start, start + Duration::minutes(90)), 5400);
        assert_eq!(elapsed_seconds(start, start - Duration::seconds(5)), 0);
    }
}
