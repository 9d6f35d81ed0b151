use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{ParticipantRole, User};
use crate::services::normalize::normalize_address;
use crate::utils::fields::non_blank;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// A thread the user took part in.
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    #[serde(skip)]
    pub user_id: String,
    pub thread_id: String,
    pub subject: String,
    pub role: ParticipantRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithThreads {
    #[serde(flatten)]
    pub user: User,
    pub threads: Vec<Participation>,
}

pub async fn list_users(pool: web::Data<SqlitePool>) -> Result<HttpResponse> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(pool.get_ref())
        .await?;

    let participations = sqlx::query_as::<_, Participation>(
        r#"
        SELECT p.user_id AS user_id, t.id AS thread_id, t.subject AS subject, p.role AS role
        FROM email_participants p
        JOIN email_threads t ON t.id = p.thread_id
        WHERE p.user_id IS NOT NULL
        ORDER BY t.updated_at DESC
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    let mut by_user: HashMap<String, Vec<Participation>> = HashMap::new();
    for participation in participations {
        by_user
            .entry(participation.user_id.clone())
            .or_default()
            .push(participation);
    }

    let response: Vec<UserWithThreads> = users
        .into_iter()
        .map(|user| UserWithThreads {
            threads: by_user.remove(&user.id).unwrap_or_default(),
            user,
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_user(pool: web::Data<SqlitePool>, path: web::Path<String>) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(HttpResponse::Ok().json(user))
}

pub async fn create_user(
    pool: web::Data<SqlitePool>,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse> {
    let email = normalize_address(&body.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: non_blank(body.name.as_deref()),
        avatar: non_blank(body.avatar.as_deref()),
        email,
        created_at: now,
        updated_at: now,
    };

    let result = sqlx::query(
        "INSERT INTO users (id, email, name, avatar, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.avatar)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(_) => {
            log::info!("Created user {} ({})", user.id, user.email);
            Ok(HttpResponse::Created().json(user))
        }
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("User with this email already exists", None)),
        Err(e) => Err(e.into()),
    }
}
