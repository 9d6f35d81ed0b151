use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{is_unique_violation, Result};
use crate::models::{ParticipantRole, User};
use crate::services::normalize::NormalizedParticipant;

/// A participant ready to be stored, linked to a user when resolution
/// succeeded.
#[derive(Debug, Clone)]
pub struct ResolvedParticipant {
    pub email: String,
    pub name: Option<String>,
    pub role: ParticipantRole,
    pub user_id: Option<String>,
}

fn default_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Find the user for an address, creating it when missing and renaming it
/// when a different name is supplied.
pub async fn find_or_create_user(pool: &SqlitePool, email: &str, name: Option<&str>) -> Result<User> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    if let Some(mut user) = find_user_by_email(pool, email).await? {
        if let Some(name) = name {
            if user.name.as_deref() != Some(name) {
                let now = Utc::now();
                sqlx::query("UPDATE users SET name = ?, updated_at = ? WHERE id = ?")
                    .bind(name)
                    .bind(now)
                    .bind(&user.id)
                    .execute(pool)
                    .await?;
                log::info!("Updated name for user {} ({})", user.id, email);
                user.name = Some(name.to_string());
                user.updated_at = now;
            }
        }
        return Ok(user);
    }

    let now = Utc::now();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: Some(name.map(str::to_string).unwrap_or_else(|| default_name(email))),
        avatar: None,
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
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            log::info!("Created user {} for {}", user.id, email);
            Ok(user)
        }
        // Another import created the same address first.
        Err(e) if is_unique_violation(&e) => find_user_by_email(pool, email)
            .await?
            .ok_or_else(|| e.into()),
        Err(e) => Err(e.into()),
    }
}

/// Link every participant to a user. A participant whose resolution fails
/// is kept without a link.
pub async fn resolve_participants(
    pool: &SqlitePool,
    participants: &[NormalizedParticipant],
) -> Vec<ResolvedParticipant> {
    let mut resolved = Vec::with_capacity(participants.len());

    for participant in participants {
        let (user_id, name) = match find_or_create_user(pool, &participant.email, participant.name.as_deref()).await {
            Ok(user) => (Some(user.id), participant.name.clone().or(user.name)),
            Err(e) => {
                log::warn!("Could not resolve user for {}: {}", participant.email, e);
                (None, participant.name.clone())
            }
        };

        resolved.push(ResolvedParticipant {
            email: participant.email.clone(),
            name,
            role: participant.role,
            user_id,
        });
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name_is_local_part() {
        assert_eq!(default_name("sarah.chen@company.com"), "sarah.chen");
        assert_eq!(default_name("nobody"), "nobody");
    }
}
