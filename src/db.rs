pub use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use crate::error::Result;
use sqlx::sqlite::SqliteConnectOptions;
use std::str::FromStr;
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    log::info!("Creating database pool for: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to an in-memory database is its own database, so the
    // pool must hold exactly one connection for its whole lifetime.
    let pool_options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            log::error!("Failed to create database pool: {}", e);
            e
        })?;

    log::info!("Database pool created successfully");

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    log::info!("Running database migrations...");

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => log::debug!("Database connection test successful"),
        Err(e) => {
            log::error!("Database connection test failed: {}", e);
            return Err(e.into());
        }
    }

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            log::error!("Failed to execute schema statement: {}", e);
            e
        })?;
    }

    log::info!("Database migrations completed ({} statements)", SCHEMA.len());
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        avatar TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        priority TEXT NOT NULL DEFAULT 'MEDIUM',
        start_date DATETIME,
        end_date DATETIME,
        budget REAL,
        client TEXT,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_members (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role TEXT NOT NULL DEFAULT 'MEMBER',
        joined_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(project_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_statuses (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT,
        color TEXT,
        sort_order INTEGER NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        status_id TEXT NOT NULL REFERENCES project_statuses(id),
        title TEXT NOT NULL,
        description TEXT,
        assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        priority TEXT NOT NULL DEFAULT 'MEDIUM',
        due_date DATETIME,
        estimated_hours REAL,
        actual_hours REAL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subtasks (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        is_completed BOOLEAN NOT NULL DEFAULT FALSE,
        sort_order INTEGER NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_comments (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS time_entry_categories (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        color TEXT,
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(project_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS time_entries (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        category_id TEXT REFERENCES time_entry_categories(id) ON DELETE SET NULL,
        description TEXT NOT NULL,
        start_time DATETIME NOT NULL,
        end_time DATETIME,
        duration INTEGER,
        is_running BOOLEAN NOT NULL DEFAULT FALSE,
        billable BOOLEAN NOT NULL DEFAULT TRUE,
        hourly_rate REAL,
        notes TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_threads (
        id TEXT PRIMARY KEY,
        thread_key TEXT NOT NULL UNIQUE,
        subject TEXT NOT NULL,
        project_id TEXT REFERENCES projects(id) ON DELETE SET NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_participants (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES email_threads(id) ON DELETE CASCADE,
        email TEXT NOT NULL,
        name TEXT,
        role TEXT NOT NULL,
        user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thread_tags (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES email_threads(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        color TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_messages (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES email_threads(id) ON DELETE CASCADE,
        message_id TEXT NOT NULL,
        from_address TEXT NOT NULL,
        to_addresses TEXT NOT NULL,
        cc_addresses TEXT NOT NULL DEFAULT '[]',
        bcc_addresses TEXT NOT NULL DEFAULT '[]',
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        text_body TEXT,
        timestamp DATETIME NOT NULL,
        is_read BOOLEAN NOT NULL DEFAULT FALSE,
        is_forwarded BOOLEAN NOT NULL DEFAULT FALSE,
        is_replied BOOLEAN NOT NULL DEFAULT FALSE,
        parent_message_id TEXT REFERENCES email_messages(id) ON DELETE SET NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_attachments (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES email_messages(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_views (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL UNIQUE REFERENCES email_threads(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT,
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_events (
        id TEXT PRIMARY KEY,
        timeline_id TEXT NOT NULL REFERENCES timeline_views(id) ON DELETE CASCADE,
        message_id TEXT REFERENCES email_messages(id) ON DELETE SET NULL,
        event_type TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        timestamp DATETIME NOT NULL,
        sort_order INTEGER NOT NULL,
        metadata TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_threads (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT,
        is_pinned BOOLEAN NOT NULL DEFAULT FALSE,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_thread_tags (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES project_threads(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        color TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thread_messages (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES project_threads(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        parent_id TEXT REFERENCES thread_messages(id) ON DELETE CASCADE,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thread_message_attachments (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES thread_messages(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // At most one running timer per user; backs up the check in the handlers.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_time_entries_one_running ON time_entries(user_id) WHERE is_running = 1",
    "CREATE INDEX IF NOT EXISTS idx_project_statuses_project_id ON project_statuses(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_subtasks_task_id ON subtasks(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_comments_task_id ON task_comments(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_time_entries_project_id ON time_entries(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_email_threads_subject ON email_threads(subject)",
    "CREATE INDEX IF NOT EXISTS idx_email_participants_thread_id ON email_participants(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_email_participants_email ON email_participants(email)",
    "CREATE INDEX IF NOT EXISTS idx_thread_tags_thread_id ON thread_tags(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_thread_id ON email_messages(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_timestamp ON email_messages(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_email_attachments_message_id ON email_attachments(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_events_timeline_id ON timeline_events(timeline_id)",
    "CREATE INDEX IF NOT EXISTS idx_project_threads_project_id ON project_threads(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_thread_messages_thread_id ON thread_messages(thread_id)",
];
