use chrono::{Duration, Utc};
use serde_json::json;

use projecthub_backend::config::Config;
use projecthub_backend::db;
use projecthub_backend::handlers::projects::DEFAULT_STATUSES;
use projecthub_backend::models::{MemberRole, Priority, ProjectState};
use projecthub_backend::services::email_import::{ImportOptions, ImportRequest};
use projecthub_backend::services::participants::find_or_create_user;
use projecthub_backend::services::ImportService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    println!("Connecting to database {}...", config.database_url);
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await?;
    if existing > 0 {
        println!("Database already has {} project(s), skipping seed", existing);
        return Ok(());
    }

    println!("Creating users...");
    let sarah = find_or_create_user(&pool, "sarah.chen@company.com", Some("Sarah Chen")).await?;
    let mike = find_or_create_user(&pool, "mike.johnson@company.com", Some("Mike Johnson")).await?;
    find_or_create_user(&pool, "alex.rivera@company.com", Some("Alex Rivera")).await?;

    println!("Creating project...");
    let now = Utc::now();
    let project_id = uuid::Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO projects (id, name, description, status, priority, start_date, end_date, budget, client, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&project_id)
    .bind("Website Redesign")
    .bind("Refresh of the public marketing site")
    .bind(ProjectState::Active)
    .bind(Priority::High)
    .bind(now)
    .bind(now + Duration::days(60))
    .bind(25000.0_f64)
    .bind("Acme Corp")
    .bind(&sarah.id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let mut status_ids = Vec::new();
    for (index, (title, color)) in DEFAULT_STATUSES.iter().enumerate() {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO project_statuses (id, project_id, title, color, sort_order, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&project_id)
        .bind(*title)
        .bind(*color)
        .bind(index as i64 + 1)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        status_ids.push(id);
    }

    for (user_id, role) in [(&sarah.id, MemberRole::Owner), (&mike.id, MemberRole::Member)] {
        sqlx::query("INSERT INTO project_members (id, project_id, user_id, role, joined_at) VALUES (?, ?, ?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&project_id)
            .bind(user_id)
            .bind(role)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    for (title, status, assignee) in [
        ("Audit existing pages", &status_ids[3], &sarah.id),
        ("Design new homepage", &status_ids[1], &mike.id),
        ("Migrate blog content", &status_ids[0], &mike.id),
    ] {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, project_id, status_id, title, assignee_id, priority, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&project_id)
        .bind(status)
        .bind(title)
        .bind(assignee)
        .bind(Priority::Medium)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    println!("Importing email threads...");
    let service = ImportService::new(pool.clone());
    let start = now - Duration::days(3);

    let outcome = service
        .import(ImportRequest {
            source: "manual".to_string(),
            data: json!({
                "subject": "Homepage mockups",
                "threadId": "seed_homepage_mockups",
                "projectId": project_id,
                "tags": [{ "name": "design", "color": "#8B5CF6" }],
                "messages": [
                    {
                        "messageId": "seed-1",
                        "from": "Sarah Chen <sarah.chen@company.com>",
                        "to": ["mike.johnson@company.com"],
                        "subject": "Homepage mockups",
                        "body": "<p>First round of mockups attached.</p>",
                        "timestamp": start.to_rfc3339(),
                        "attachments": [{ "filename": "mockups.pdf", "contentType": "application/pdf", "size": 482133 }]
                    },
                    {
                        "messageId": "seed-2",
                        "from": "Mike Johnson <mike.johnson@company.com>",
                        "to": ["sarah.chen@company.com"],
                        "cc": ["alex.rivera@company.com"],
                        "subject": "Re: Homepage mockups",
                        "body": "<p>Looks good, a few notes inline.</p>",
                        "timestamp": (start + Duration::hours(4)).to_rfc3339(),
                        "isReplied": true,
                        "parentMessageId": "seed-1"
                    }
                ]
            }),
            options: ImportOptions {
                auto_generate_timeline: true,
                allow_duplicate: false,
            },
        })
        .await?;
    println!(
        "Imported thread {} with {} message(s)",
        outcome.thread.thread.id, outcome.imported_messages
    );

    let outcome = service
        .import(ImportRequest {
            source: "forwarded_email".to_string(),
            data: json!({
                "subject": "Fwd: Hosting quote",
                "from": "Alex Rivera <alex.rivera@company.com>",
                "to": ["sarah.chen@company.com"],
                "body": "<p>Forwarding the hosting quote from the vendor.</p>",
                "timestamp": (start + Duration::days(1)).to_rfc3339()
            }),
            options: ImportOptions::default(),
        })
        .await?;
    println!(
        "Imported thread {} with {} message(s)",
        outcome.thread.thread.id, outcome.imported_messages
    );

    println!("✅ Seed data created");
    Ok(())
}
