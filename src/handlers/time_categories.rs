use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{is_unique_violation, AppError, Result};
use crate::handlers::projects::find_project;
use crate::models::TimeEntryCategory;
use crate::utils::fields::non_blank;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub is_default: Option<bool>,
}

pub async fn list_categories(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let categories = sqlx::query_as::<_, TimeEntryCategory>(
        "SELECT * FROM time_entry_categories WHERE project_id = ? ORDER BY is_default DESC, name ASC",
    )
    .bind(&project.id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(categories))
}

pub async fn create_category(
    pool: web::Data<SqlitePool>,
    path: web::Path<String>,
    body: web::Json<CreateCategoryRequest>,
) -> Result<HttpResponse> {
    let project = find_project(pool.get_ref(), &path.into_inner()).await?;

    let name = non_blank(body.name.as_deref())
        .ok_or_else(|| AppError::BadRequest("Category name is required".to_string()))?;

    let category = TimeEntryCategory {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project.id,
        name,
        color: non_blank(body.color.as_deref()),
        is_default: body.is_default.unwrap_or(false),
        created_at: Utc::now(),
    };

    let mut tx = pool.begin().await?;

    // At most one default per project.
    if category.is_default {
        sqlx::query("UPDATE time_entry_categories SET is_default = 0 WHERE project_id = ? AND is_default = 1")
            .bind(&category.project_id)
            .execute(&mut *tx)
            .await?;
    }

    let result = sqlx::query(
        r#"
        INSERT INTO time_entry_categories (id, project_id, name, color, is_default, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&category.id)
    .bind(&category.project_id)
    .bind(&category.name)
    .bind(&category.color)
    .bind(category.is_default)
    .bind(category.created_at)
    .execute(&mut *tx)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::BadRequest("Category with this name already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    tx.commit().await?;
    Ok(HttpResponse::Created().json(category))
}

pub async fn delete_category(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (project_id, category_id) = path.into_inner();

    let result = sqlx::query("DELETE FROM time_entry_categories WHERE id = ? AND project_id = ?")
        .bind(&category_id)
        .bind(&project_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Time category"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Time category deleted successfully"
    })))
}
