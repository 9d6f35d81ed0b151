use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::config::Config;
use crate::error::{is_unique_violation, AppError, Result};
use crate::handlers::{PageQuery, Pagination};
use crate::models::{MemberRole, Priority, Project, ProjectMember, ProjectState, ProjectStatus, UserSummary};
use crate::utils::fields::{deserialize_some, non_blank};

/// Statuses every new project starts with: (title, color).
pub const DEFAULT_STATUSES: &[(&str, &str)] = &[
    ("Planning", "#6B7280"),
    ("In Progress", "#3B82F6"),
    ("Review", "#F59E0B"),
    ("Completed", "#10B981"),
];

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ProjectState>,
    pub priority: Option<Priority>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub budget: Option<f64>,
    pub client: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub status: Option<ProjectState>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub budget: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub client: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: Option<MemberRole>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStatusRequest {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub order: Option<i64>,
}

#[derive(Debug, FromRow)]
struct MemberRow {
    id: String,
    project_id: String,
    user_id: String,
    role: MemberRole,
    joined_at: DateTime<Utc>,
    user_name: Option<String>,
    user_email: String,
    user_avatar: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberWithUser {
    #[serde(flatten)]
    pub member: ProjectMember,
    pub user: UserSummary,
}

impl From<MemberRow> for MemberWithUser {
    fn from(row: MemberRow) -> Self {
        MemberWithUser {
            user: UserSummary {
                id: row.user_id.clone(),
                name: row.user_name,
                email: row.user_email,
                avatar: row.user_avatar,
            },
            member: ProjectMember {
                id: row.id,
                project_id: row.project_id,
                user_id: row.user_id,
                role: row.role,
                joined_at: row.joined_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub creator: Option<UserSummary>,
    pub members: Vec<MemberWithUser>,
    pub task_count: i64,
    pub thread_count: i64,
}

pub async fn find_project(pool: &SqlitePool, project_id: &str) -> Result<Project> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Project"))
}

pub async fn find_user_summary(pool: &SqlitePool, user_id: &str) -> Result<Option<UserSummary>> {
    let user = sqlx::query_as::<_, UserSummary>("SELECT id, name, email, avatar FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

async fn load_members(pool: &SqlitePool, project_id: &str) -> Result<Vec<MemberWithUser>> {
    let rows = sqlx::query_as::<_, MemberRow>(
        r#"
        SELECT m.id, m.project_id, m.user_id, m.role, m.joined_at,
               u.name AS user_name, u.email AS user_email, u.avatar AS user_avatar
        FROM project_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.project_id = ?
        ORDER BY m.joined_at, m.rowid
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MemberWithUser::from).collect())
}

async fn load_detail(pool: &SqlitePool, project: Project) -> Result<ProjectDetail> {
    let creator = match &project.created_by {
        Some(user_id) => find_user_summary(pool, user_id).await?,
        None => None,
    };
    let members = load_members(pool, &project.id).await?;

    let task_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
        .bind(&project.id)
        .fetch_one(pool)
        .await?;
    let thread_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM project_threads WHERE project_id = ?")
        .bind(&project.id)
        .fetch_one(pool)
        .await?;

    Ok(ProjectDetail {
        project,
        creator,
        members,
        task_count,
        thread_count,
    })
}

pub async fn list_projects(
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    query: web::Query<ListProjectsQuery>,
) -> Result<HttpResponse> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(value) => Some(
            ProjectState::parse(value)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown project status: {}", value)))?,
        ),
    };

    let paging = PageQuery {
        page: query.page,
        limit: query.limit,
    };
    let (page, limit, offset) = paging.resolve(&config);

    let (projects, total) = match status {
        Some(status) => {
            let projects = sqlx::query_as::<_, Project>(
                "SELECT * FROM projects WHERE status = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM projects WHERE status = ?")
                .bind(status)
                .fetch_one(pool.get_ref())
                .await?;
            (projects, total)
        }
        None => {
            let projects = sqlx::query_as::<_, Project>(
                "SELECT * FROM projects ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM projects")
                .fetch_one(pool.get_ref())
                .await?;
            (projects, total)
        }
    };

    let mut details = Vec::with_capacity(projects.len());
    for project in projects {
        details.push(load_detail(pool.get_ref(), project).await?);
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "projects": details,
        "pagination": Pagination::new(page, limit, total)
    })))
}

pub async fn get_project(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let detail = load_detail(pool.get_ref(), project).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn create_project(
    pool: web::Data<SqlitePool>,
    body: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    let name = non_blank(Some(&body.name))
        .ok_or_else(|| AppError::BadRequest("Project name is required".to_string()))?;

    if let Some(creator) = &body.created_by {
        if find_user_summary(pool.get_ref(), creator).await?.is_none() {
            return Err(AppError::not_found("User"));
        }
    }

    let now = Utc::now();
    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        description: non_blank(body.description.as_deref()),
        status: body.status.unwrap_or_default(),
        priority: body.priority.unwrap_or_default(),
        start_date: body.start_date,
        end_date: body.end_date,
        budget: body.budget,
        client: non_blank(body.client.as_deref()),
        created_by: body.created_by,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO projects (id, name, description, status, priority, start_date, end_date, budget, client, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.status)
    .bind(project.priority)
    .bind(project.start_date)
    .bind(project.end_date)
    .bind(project.budget)
    .bind(&project.client)
    .bind(&project.created_by)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(&mut *tx)
    .await?;

    for (index, (title, color)) in DEFAULT_STATUSES.iter().enumerate() {
        sqlx::query(
            "INSERT INTO project_statuses (id, project_id, title, color, sort_order, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&project.id)
        .bind(*title)
        .bind(*color)
        .bind(index as i64 + 1)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(creator) = &project.created_by {
        sqlx::query(
            "INSERT INTO project_members (id, project_id, user_id, role, joined_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&project.id)
        .bind(creator)
        .bind(MemberRole::Owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    log::info!("Created project {} ({})", project.id, project.name);

    let detail = load_detail(pool.get_ref(), project).await?;
    Ok(HttpResponse::Created().json(detail))
}

pub async fn update_project(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<UpdateProjectRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let mut project = find_project(pool.get_ref(), &path.into_inner()).await?;

    if let Some(name) = body.name {
        project.name = non_blank(Some(&name))
            .ok_or_else(|| AppError::BadRequest("Project name is required".to_string()))?;
    }
    if let Some(description) = body.description {
        project.description = non_blank(description.as_deref());
    }
    if let Some(status) = body.status {
        project.status = status;
    }
    if let Some(priority) = body.priority {
        project.priority = priority;
    }
    if let Some(start_date) = body.start_date {
        project.start_date = start_date;
    }
    if let Some(end_date) = body.end_date {
        project.end_date = end_date;
    }
    if let Some(budget) = body.budget {
        project.budget = budget;
    }
    if let Some(client) = body.client {
        project.client = non_blank(client.as_deref());
    }
    project.updated_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, description = ?, status = ?, priority = ?, start_date = ?, end_date = ?,
            budget = ?, client = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.status)
    .bind(project.priority)
    .bind(project.start_date)
    .bind(project.end_date)
    .bind(project.budget)
    .bind(&project.client)
    .bind(project.updated_at)
    .bind(&project.id)
    .execute(pool.get_ref())
    .await?;

    let detail = load_detail(pool.get_ref(), project).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn delete_project(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project_id = path.into_inner();

    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&project_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Project"));
    }

    log::info!("Deleted project {}", project_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Project deleted successfully"
    })))
}

pub async fn list_members(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let members = load_members(pool.get_ref(), &project.id).await?;
    Ok(HttpResponse::Ok().json(members))
}

pub async fn add_member(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;
    let user = find_user_summary(pool.get_ref(), &body.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let member = ProjectMember {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        user_id: user.id.clone(),
        role: body.role.unwrap_or_default(),
        joined_at: Utc::now(),
    };

    let result = sqlx::query(
        "INSERT INTO project_members (id, project_id, user_id, role, joined_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&member.id)
    .bind(&member.project_id)
    .bind(&member.user_id)
    .bind(member.role)
    .bind(member.joined_at)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(_) => Ok(HttpResponse::Created().json(MemberWithUser { member, user })),
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("User is already a member of this project", None)),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove_member(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (project_id, user_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
        .bind(&project_id)
        .bind(&user_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Project member"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Member removed successfully"
    })))
}

pub async fn list_statuses(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let statuses = sqlx::query_as::<_, ProjectStatus>(
        "SELECT * FROM project_statuses WHERE project_id = ? ORDER BY sort_order, created_at",
    )
    .bind(&project.id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(statuses))
}

pub async fn create_status(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<CreateStatusRequest>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let title = non_blank(Some(&body.title))
        .ok_or_else(|| AppError::BadRequest("Status title is required".to_string()))?;

    let order = match body.order {
        Some(order) => order,
        None => {
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sort_order) FROM project_statuses WHERE project_id = ?")
                .bind(&project.id)
                .fetch_one(pool.get_ref())
                .await?
                .unwrap_or(0)
                + 1
        }
    };

    let status = ProjectStatus {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        title,
        description: non_blank(body.description.as_deref()),
        color: non_blank(body.color.as_deref()),
        sort_order: order,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO project_statuses (id, project_id, title, description, color, sort_order, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&status.id)
    .bind(&status.project_id)
    .bind(&status.title)
    .bind(&status.description)
    .bind(&status.color)
    .bind(status.sort_order)
    .bind(status.created_at)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(status))
}
