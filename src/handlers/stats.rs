use actix_web::{web, HttpResponse};
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use crate::error::Result;

const COUNTED_TABLES: &[(&str, &str)] = &[
    ("users", "users"),
    ("projects", "projects"),
    ("tasks", "tasks"),
    ("timeEntries", "time_entries"),
    ("emailThreads", "email_threads"),
    ("emailMessages", "email_messages"),
    ("emailParticipants", "email_participants"),
    ("timelineViews", "timeline_views"),
    ("timelineEvents", "timeline_events"),
    ("projectThreads", "project_threads"),
    ("threadMessages", "thread_messages"),
];

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "ProjectHub Backend",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Row counts per entity.
pub async fn get_stats(pool: web::Data<SqlitePool>) -> Result<HttpResponse> {
    let mut counts = Map::new();

    for (key, table) in COUNTED_TABLES {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool.get_ref())
            .await?;
        counts.insert(key.to_string(), Value::from(count));
    }

    Ok(HttpResponse::Ok().json(Value::Object(counts)))
}
