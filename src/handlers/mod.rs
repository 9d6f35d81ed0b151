pub mod email_import;
pub mod email_threads;
pub mod project_threads;
pub mod projects;
pub mod stats;
pub mod tasks;
pub mod time_categories;
pub mod time_entries;
pub mod timeline_events;
pub mod timelines;
pub mod users;

use actix_web::web;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::utils::fields::{page_count, page_offset, page_params};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Page, limit and row offset under the configured bounds.
    pub fn resolve(&self, config: &Config) -> (i64, i64, i64) {
        let (page, limit) = page_params(self.page, self.limit, config.default_page_size, config.max_page_size);
        (page, limit, page_offset(page, limit))
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: page_count(total, limit),
        }
    }
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(4 * 1024 * 1024)
        .error_handler(|err, _req| AppError::BadRequest(format!("Invalid JSON body: {}", err)).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(format!("Invalid query string: {}", err)).into())
}

/// Register every route. The pool and config are expected as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .route("/health", web::get().to(stats::health_check))
        .service(
            web::scope("/api")
                .route("/stats", web::get().to(stats::get_stats))
                // Users
                .route("/users", web::get().to(users::list_users))
                .route("/users", web::post().to(users::create_user))
                .route("/users/{id}", web::get().to(users::get_user))
                // Projects
                .route("/projects", web::get().to(projects::list_projects))
                .route("/projects", web::post().to(projects::create_project))
                .route("/projects/{id}", web::get().to(projects::get_project))
                .route("/projects/{id}", web::put().to(projects::update_project))
                .route("/projects/{id}", web::delete().to(projects::delete_project))
                .route("/projects/{id}/members", web::get().to(projects::list_members))
                .route("/projects/{id}/members", web::post().to(projects::add_member))
                .route("/projects/{id}/members/{user_id}", web::delete().to(projects::remove_member))
                .route("/projects/{id}/statuses", web::get().to(projects::list_statuses))
                .route("/projects/{id}/statuses", web::post().to(projects::create_status))
                // Tasks
                .route("/projects/{id}/tasks", web::get().to(tasks::list_tasks))
                .route("/projects/{id}/tasks", web::post().to(tasks::create_task))
                .route("/projects/{id}/tasks/{task_id}", web::get().to(tasks::get_task))
                .route("/projects/{id}/tasks/{task_id}", web::put().to(tasks::update_task))
                .route("/projects/{id}/tasks/{task_id}", web::delete().to(tasks::delete_task))
                .route("/projects/{id}/tasks/{task_id}/subtasks", web::post().to(tasks::create_subtask))
                .route("/projects/{id}/tasks/{task_id}/subtasks/{subtask_id}", web::put().to(tasks::update_subtask))
                .route("/projects/{id}/tasks/{task_id}/subtasks/{subtask_id}", web::delete().to(tasks::delete_subtask))
                .route("/projects/{id}/tasks/{task_id}/comments", web::get().to(tasks::list_comments))
                .route("/projects/{id}/tasks/{task_id}/comments", web::post().to(tasks::create_comment))
                // Time tracking
                .route("/projects/{id}/time-entries", web::get().to(time_entries::list_time_entries))
                .route("/projects/{id}/time-entries", web::post().to(time_entries::create_time_entry))
                .route("/projects/{id}/time-entries/clear-running", web::post().to(time_entries::clear_running))
                .route("/projects/{id}/time-entries/{entry_id}", web::get().to(time_entries::get_time_entry))
                .route("/projects/{id}/time-entries/{entry_id}", web::put().to(time_entries::update_time_entry))
                .route("/projects/{id}/time-entries/{entry_id}", web::delete().to(time_entries::delete_time_entry))
                .route("/projects/{id}/time-categories", web::get().to(time_categories::list_categories))
                .route("/projects/{id}/time-categories", web::post().to(time_categories::create_category))
                .route("/projects/{id}/time-categories/{category_id}", web::delete().to(time_categories::delete_category))
                // Project discussion threads
                .route("/projects/{id}/threads", web::get().to(project_threads::list_threads))
                .route("/projects/{id}/threads", web::post().to(project_threads::create_thread))
                .route("/projects/{id}/threads/{thread_id}", web::get().to(project_threads::get_thread))
                .route("/projects/{id}/threads/{thread_id}", web::put().to(project_threads::update_thread))
                .route("/projects/{id}/threads/{thread_id}", web::delete().to(project_threads::delete_thread))
                .route("/projects/{id}/threads/{thread_id}/messages", web::get().to(project_threads::list_messages))
                .route("/projects/{id}/threads/{thread_id}/messages", web::post().to(project_threads::create_message))
                .route("/projects/{id}/timeline", web::get().to(project_threads::project_timeline))
                // Email threads
                .route("/email-threads", web::get().to(email_threads::list_threads))
                .route("/email-threads", web::post().to(email_threads::create_thread))
                .route("/email-threads/{id}", web::get().to(email_threads::get_thread))
                .route("/email-threads/{id}", web::put().to(email_threads::update_thread))
                .route("/email-threads/{id}", web::delete().to(email_threads::delete_thread))
                .route("/email-import", web::post().to(email_import::import_email))
                // Timelines
                .route("/timelines", web::get().to(timelines::list_timelines))
                .route("/timelines", web::post().to(timelines::create_timeline))
                .route("/timelines/generate", web::post().to(timelines::generate_timeline))
                .route("/timelines/{id}", web::get().to(timelines::get_timeline))
                .route("/timelines/{id}", web::put().to(timelines::update_timeline))
                .route("/timelines/{id}", web::delete().to(timelines::delete_timeline))
                .route("/timelines/{id}/events", web::get().to(timeline_events::list_events))
                .route("/timelines/{id}/events", web::post().to(timeline_events::create_event))
                .route("/timelines/{id}/events/reorder", web::post().to(timeline_events::reorder_events))
                .route("/timelines/{id}/events/{event_id}", web::get().to(timeline_events::get_event))
                .route("/timelines/{id}/events/{event_id}", web::put().to(timeline_events::update_event))
                .route("/timelines/{id}/events/{event_id}", web::delete().to(timeline_events::delete_event)),
        );
}
