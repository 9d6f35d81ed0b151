use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::handlers::projects::{find_project, find_user_summary};
use crate::handlers::{PageQuery, Pagination};
use crate::models::{Priority, Subtask, Task, TaskComment, UserSummary};
use crate::utils::fields::{deserialize_some, non_blank};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status_id: Option<String>,
    pub assignee_id: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub status_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub assignee_id: Option<Option<String>>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub estimated_hours: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub actual_hours: Option<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubtaskRequest {
    pub title: String,
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubtaskRequest {
    pub title: Option<String>,
    pub is_completed: Option<bool>,
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StatusSummary {
    pub id: String,
    pub title: String,
    pub color: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: Task,
    pub assignee: Option<UserSummary>,
    pub status: Option<StatusSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithUser {
    #[serde(flatten)]
    pub comment: TaskComment,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    pub subtasks: Vec<Subtask>,
    pub comments: Vec<CommentWithUser>,
}

async fn find_task(pool: &SqlitePool, project_id: &str, task_id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ? AND project_id = ?")
        .bind(task_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Task"))
}

/// The status must belong to the task's project.
async fn check_status(pool: &SqlitePool, project_id: &str, status_id: &str) -> Result<()> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM project_statuses WHERE id = ? AND project_id = ?",
    )
    .bind(status_id)
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    if found == 0 {
        return Err(AppError::BadRequest("Status does not belong to this project".to_string()));
    }
    Ok(())
}

async fn check_user(pool: &SqlitePool, user_id: &str) -> Result<()> {
    if find_user_summary(pool, user_id).await?.is_none() {
        return Err(AppError::not_found("User"));
    }
    Ok(())
}

async fn summarize(pool: &SqlitePool, task: Task) -> Result<TaskSummary> {
    let assignee = match &task.assignee_id {
        Some(user_id) => find_user_summary(pool, user_id).await?,
        None => None,
    };
    let status = sqlx::query_as::<_, StatusSummary>("SELECT id, title, color FROM project_statuses WHERE id = ?")
        .bind(&task.status_id)
        .fetch_optional(pool)
        .await?;

    Ok(TaskSummary { task, assignee, status })
}

async fn load_comments(pool: &SqlitePool, task_id: &str) -> Result<Vec<CommentWithUser>> {
    let comments = sqlx::query_as::<_, TaskComment>(
        "SELECT * FROM task_comments WHERE task_id = ? ORDER BY created_at, rowid",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    let mut result = Vec::with_capacity(comments.len());
    for comment in comments {
        let user = find_user_summary(pool, &comment.user_id).await?;
        result.push(CommentWithUser { comment, user });
    }
    Ok(result)
}

pub async fn list_tasks(
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let (page, limit, offset) = query.resolve(&config);

    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
    )
    .bind(&project.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool.get_ref())
    .await?;

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
        .bind(&project.id)
        .fetch_one(pool.get_ref())
        .await?;

    let mut summaries = Vec::with_capacity(tasks.len());
    for task in tasks {
        summaries.push(summarize(pool.get_ref(), task).await?);
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tasks": summaries,
        "pagination": Pagination::new(page, limit, total)
    })))
}

pub async fn get_task(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();
    let task = find_task(pool.get_ref(), &project_id, &task_id).await?;

    let subtasks = sqlx::query_as::<_, Subtask>(
        "SELECT * FROM subtasks WHERE task_id = ? ORDER BY sort_order, created_at",
    )
    .bind(&task.id)
    .fetch_all(pool.get_ref())
    .await?;
    let comments = load_comments(pool.get_ref(), &task.id).await?;
    let summary = summarize(pool.get_ref(), task).await?;

    Ok(HttpResponse::Ok().json(TaskDetail {
        summary,
        subtasks,
        comments,
    }))
}

pub async fn create_task(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let title = non_blank(Some(&body.title))
        .ok_or_else(|| AppError::BadRequest("Task title is required".to_string()))?;

    let status_id = match body.status_id {
        Some(status_id) => {
            check_status(pool.get_ref(), &project.id, &status_id).await?;
            status_id
        }
        None => sqlx::query_scalar::<_, String>(
            "SELECT id FROM project_statuses WHERE project_id = ? ORDER BY sort_order, created_at LIMIT 1",
        )
        .bind(&project.id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::BadRequest("Project has no statuses".to_string()))?,
    };

    if let Some(assignee) = &body.assignee_id {
        check_user(pool.get_ref(), assignee).await?;
    }

    let now = Utc::now();
    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        status_id,
        title,
        description: non_blank(body.description.as_deref()),
        assignee_id: body.assignee_id,
        priority: body.priority.unwrap_or_default(),
        due_date: body.due_date,
        estimated_hours: body.estimated_hours,
        actual_hours: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO tasks (id, project_id, status_id, title, description, assignee_id, priority, due_date, estimated_hours, actual_hours, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.id)
    .bind(&task.project_id)
    .bind(&task.status_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.assignee_id)
    .bind(task.priority)
    .bind(task.due_date)
    .bind(task.estimated_hours)
    .bind(task.actual_hours)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(pool.get_ref())
    .await?;

    let summary = summarize(pool.get_ref(), task).await?;
    Ok(HttpResponse::Created().json(summary))
}

pub async fn update_task(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();
    let body = body.into_inner();
    let mut task = find_task(pool.get_ref(), &project_id, &task_id).await?;

    if let Some(title) = body.title {
        task.title = non_blank(Some(&title))
            .ok_or_else(|| AppError::BadRequest("Task title is required".to_string()))?;
    }
    if let Some(description) = body.description {
        task.description = non_blank(description.as_deref());
    }
    if let Some(status_id) = body.status_id {
        check_status(pool.get_ref(), &project_id, &status_id).await?;
        task.status_id = status_id;
    }
    if let Some(assignee_id) = body.assignee_id {
        if let Some(user_id) = &assignee_id {
            check_user(pool.get_ref(), user_id).await?;
        }
        task.assignee_id = assignee_id;
    }
    if let Some(priority) = body.priority {
        task.priority = priority;
    }
    if let Some(due_date) = body.due_date {
        task.due_date = due_date;
    }
    if let Some(estimated) = body.estimated_hours {
        task.estimated_hours = estimated;
    }
    if let Some(actual) = body.actual_hours {
        task.actual_hours = actual;
    }
    task.updated_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE tasks
        SET title = ?, description = ?, status_id = ?, assignee_id = ?, priority = ?, due_date = ?,
            estimated_hours = ?, actual_hours = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status_id)
    .bind(&task.assignee_id)
    .bind(task.priority)
    .bind(task.due_date)
    .bind(task.estimated_hours)
    .bind(task.actual_hours)
    .bind(task.updated_at)
    .bind(&task.id)
    .execute(pool.get_ref())
    .await?;

    let summary = summarize(pool.get_ref(), task).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn delete_task(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND project_id = ?")
        .bind(&task_id)
        .bind(&project_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Task"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Task deleted successfully"
    })))
}

pub async fn create_subtask(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<CreateSubtaskRequest>,
) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();
    let task = find_task(pool.get_ref(), &project_id, &task_id).await?;

    let title = non_blank(Some(&body.title))
        .ok_or_else(|| AppError::BadRequest("Subtask title is required".to_string()))?;

    let order = match body.order {
        Some(order) => order,
        None => {
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sort_order) FROM subtasks WHERE task_id = ?")
                .bind(&task.id)
                .fetch_one(pool.get_ref())
                .await?
                .unwrap_or(0)
                + 1
        }
    };

    let now = Utc::now();
    let subtask = Subtask {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task.id,
        title,
        is_completed: false,
        sort_order: order,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO subtasks (id, task_id, title, is_completed, sort_order, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&subtask.id)
    .bind(&subtask.task_id)
    .bind(&subtask.title)
    .bind(subtask.is_completed)
    .bind(subtask.sort_order)
    .bind(subtask.created_at)
    .bind(subtask.updated_at)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(subtask))
}

pub async fn update_subtask(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String, String)>,
    body: web::Json<UpdateSubtaskRequest>,
) -> Result<HttpResponse> {
    let (project_id, task_id, subtask_id) = path.into_inner();
    find_task(pool.get_ref(), &project_id, &task_id).await?;

    let mut subtask = sqlx::query_as::<_, Subtask>("SELECT * FROM subtasks WHERE id = ? AND task_id = ?")
        .bind(&subtask_id)
        .bind(&task_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("Subtask"))?;

    if let Some(title) = &body.title {
        subtask.title = non_blank(Some(title))
            .ok_or_else(|| AppError::BadRequest("Subtask title is required".to_string()))?;
    }
    if let Some(done) = body.is_completed {
        subtask.is_completed = done;
    }
    if let Some(order) = body.order {
        subtask.sort_order = order;
    }
    subtask.updated_at = Utc::now();

    sqlx::query("UPDATE subtasks SET title = ?, is_completed = ?, sort_order = ?, updated_at = ? WHERE id = ?")
        .bind(&subtask.title)
        .bind(subtask.is_completed)
        .bind(subtask.sort_order)
        .bind(subtask.updated_at)
        .bind(&subtask.id)
        .execute(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(subtask))
}

pub async fn delete_subtask(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String, String)>,
) -> Result<HttpResponse> {
    let (project_id, task_id, subtask_id) = path.into_inner();
    find_task(pool.get_ref(), &project_id, &task_id).await?;

    let result = sqlx::query("DELETE FROM subtasks WHERE id = ? AND task_id = ?")
        .bind(&subtask_id)
        .bind(&task_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Subtask"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Subtask deleted successfully"
    })))
}

pub async fn list_comments(pool: web::Data<SqlitePool>, path: web::Path<(String, String)>) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();
    let task = find_task(pool.get_ref(), &project_id, &task_id).await?;
    let comments = load_comments(pool.get_ref(), &task.id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

pub async fn create_comment(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
    body: web::Json<CreateCommentRequest>,
) -> Result<HttpResponse> {
    let (project_id, task_id) = path.into_inner();
    let task = find_task(pool.get_ref(), &project_id, &task_id).await?;

    let content = non_blank(Some(&body.content))
        .ok_or_else(|| AppError::BadRequest("Comment content is required".to_string()))?;
    let user = find_user_summary(pool.get_ref(), &body.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let now = Utc::now();
    let comment = TaskComment {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task.id,
        user_id: user.id.clone(),
        content,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO task_comments (id, task_id, user_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&comment.id)
    .bind(&comment.task_id)
    .bind(&comment.user_id)
    .bind(&comment.content)
    .bind(comment.created_at)
    .bind(comment.updated_at)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(CommentWithUser {
        comment,
        user: Some(user),
    }))
}
