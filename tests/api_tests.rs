use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use projecthub_backend::config::Config;
use projecthub_backend::{db, handlers};

async fn test_pool() -> SqlitePool {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

macro_rules! init_app {
    ($pool:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($pool.clone()))
                .app_data(web::Data::new(Config::default()))
                .configure(handlers::configure),
        )
        .await
    };
}

fn manual_payload(thread_id: &str, subject: &str, sender: &str) -> Value {
    json!({
        "source": "manual",
        "data": {
            "subject": subject,
            "threadId": thread_id,
            "messages": [
                {
                    "messageId": format!("{}-3", thread_id),
                    "from": "alice@company.com",
                    "to": ["john@company.com"],
                    "subject": format!("Re: {}", subject),
                    "body": "<p>Third</p>",
                    "timestamp": "2024-11-15T12:00:00Z",
                    "isReplied": true,
                    "parentMessageId": format!("{}-1", thread_id)
                },
                {
                    "messageId": format!("{}-1", thread_id),
                    "from": sender,
                    "to": ["alice@company.com"],
                    "subject": subject,
                    "body": "<p>First</p>",
                    "timestamp": "2024-11-15T10:00:00Z",
                    "attachments": [{ "filename": "plan.pdf", "contentType": "application/pdf", "size": 1200 }]
                },
                {
                    "messageId": format!("{}-2", thread_id),
                    "from": "bob@company.com",
                    "to": ["john@company.com"],
                    "subject": format!("Fwd: {}", subject),
                    "body": "<p>Second</p>",
                    "timestamp": "2024-11-15T11:00:00Z",
                    "isForwarded": true
                }
            ]
        },
        "options": { "autoGenerateTimeline": true }
    })
}

fn with_tags(mut payload: Value, tags: &[&str]) -> Value {
    payload["data"]["tags"] = tags.iter().map(|name| json!({ "name": name })).collect();
    payload
}

fn without_thread_key(mut payload: Value) -> Value {
    payload["data"].as_object_mut().unwrap().remove("threadId");
    payload
}

async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn forwarded_payload() -> Value {
    json!({
        "source": "forwarded_email",
        "data": {
            "subject": "Fwd: Budget approval",
            "from": "Dana Lee <dana@company.com>",
            "to": ["team@company.com"],
            "body": "<p>Approved.</p>",
            "timestamp": "2024-11-14T09:30:00Z"
        }
    })
}

#[actix_rt::test]
async fn test_health_check() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_rt::test]
async fn test_manual_import_stores_every_message() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("launch", "Launch plan", "John Smith <john@company.com>"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["importedMessages"], 3);
    assert_eq!(body["thread"]["messageCount"], 3);
    assert_eq!(body["thread"]["messages"].as_array().unwrap().len(), 3);
}

#[actix_rt::test]
async fn test_invalid_import_lists_problems() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(json!({
            "source": "manual",
            "data": { "subject": "Empty", "messages": [] }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid email data");
    assert!(!body["details"].as_array().unwrap().is_empty());
}

#[actix_rt::test]
async fn test_unknown_import_source_is_rejected() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(json!({ "source": "carrier_pigeon", "data": {} }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn test_forwarded_reimport_conflicts() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(forwarded_payload())
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    let thread_id = first["thread"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(forwarded_payload())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["threadId"], thread_id.as_str());

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["emailThreads"], 1);
    assert_eq!(stats["emailMessages"], 1);
}

#[actix_rt::test]
async fn test_participant_user_takes_latest_name() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("first", "Kickoff", "John Smith <john@company.com>"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("second", "Retro", "Johnny Smith <JOHN@company.com>"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::get().uri("/api/users").to_request();
    let users: Value = test::call_and_read_body_json(&app, req).await;
    let johns: Vec<&Value> = users
        .as_array()
        .unwrap()
        .iter()
        .filter(|u| u["email"] == "john@company.com")
        .collect();
    assert_eq!(johns.len(), 1);
    assert_eq!(johns[0]["name"], "Johnny Smith");
}

#[actix_rt::test]
async fn test_generated_timeline_follows_timestamps() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("ordered", "Ordering", "john@company.com"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let events = body["timeline"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    let orders: Vec<i64> = events.iter().map(|e| e["order"].as_i64().unwrap()).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    let types: Vec<&str> = events.iter().map(|e| e["eventType"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["EMAIL_RECEIVED", "EMAIL_FORWARDED", "EMAIL_REPLIED"]);
    assert_eq!(events[0]["description"], "Email from john@company.com (1 attachment) (1 reply)");

    // Generating again returns the same timeline.
    let thread_id = body["thread"]["id"].as_str().unwrap();
    let req = test::TestRequest::post()
        .uri("/api/timelines/generate")
        .set_json(json!({ "threadId": thread_id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let again: Value = test::read_body_json(resp).await;
    assert_eq!(again["generatedEvents"], 0);
    assert_eq!(again["timeline"]["id"], body["timeline"]["id"]);
}

#[actix_rt::test]
async fn test_reorder_and_delete_keep_orders_dense() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("reorder", "Reorder", "john@company.com"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let timeline_id = body["timeline"]["id"].as_str().unwrap().to_string();
    let mut ids: Vec<String> = body["timeline"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    ids.reverse();

    let req = test::TestRequest::post()
        .uri(&format!("/api/timelines/{}/events/reorder", timeline_id))
        .set_json(json!({ "eventIds": ids }))
        .to_request();
    let reordered: Value = test::call_and_read_body_json(&app, req).await;
    let listed: Vec<&str> = reordered["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(listed, ids.iter().map(String::as_str).collect::<Vec<_>>());

    // A partial list is not a permutation.
    let req = test::TestRequest::post()
        .uri(&format!("/api/timelines/{}/events/reorder", timeline_id))
        .set_json(json!({ "eventIds": [ids[0].clone()] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/timelines/{}/events/{}", timeline_id, ids[0]))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/timelines/{}/events", timeline_id))
        .to_request();
    let events: Value = test::call_and_read_body_json(&app, req).await;
    let orders: Vec<i64> = events.as_array().unwrap().iter().map(|e| e["order"].as_i64().unwrap()).collect();
    assert_eq!(orders, vec![1, 2]);
    assert_eq!(events[0]["id"], ids[1].as_str());
}

#[actix_rt::test]
async fn test_custom_event_inserted_at_order() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(manual_payload("custom", "Custom", "john@company.com"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let timeline_id = body["timeline"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/timelines/{}/events", timeline_id))
        .set_json(json!({ "title": "Contract signed", "order": 2 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["eventType"], "CUSTOM");
    assert_eq!(created["order"], 2);

    let req = test::TestRequest::get()
        .uri(&format!("/api/timelines/{}/events", timeline_id))
        .to_request();
    let events: Value = test::call_and_read_body_json(&app, req).await;
    let orders: Vec<i64> = events.as_array().unwrap().iter().map(|e| e["order"].as_i64().unwrap()).collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
    assert_eq!(events[1]["title"], "Contract signed");
}

#[actix_rt::test]
async fn test_delete_email_thread_cascades() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(with_tags(manual_payload("cascade", "Cascade", "john@company.com"), &["client", "legal"]))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let thread_id = body["thread"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["thread"]["tags"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/email-threads/{}", thread_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["emailThreads"], 0);
    assert_eq!(stats["emailMessages"], 0);
    assert_eq!(stats["emailParticipants"], 0);
    assert_eq!(stats["timelineViews"], 0);
    assert_eq!(stats["timelineEvents"], 0);
    // Users outlive the threads they took part in.
    assert_eq!(stats["users"], 3);
    assert_eq!(count_rows(&pool, "thread_tags").await, 0);
    assert_eq!(count_rows(&pool, "email_attachments").await, 0);

    let req = test::TestRequest::get()
        .uri(&format!("/api/email-threads/{}", thread_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_project_crud_seeds_statuses() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "Owner@Company.com", "name": "Owner" }))
        .to_request();
    let user: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(user["email"], "owner@company.com");
    let user_id = user["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/projects")
        .set_json(json!({ "name": "Website", "createdBy": user_id, "priority": "HIGH" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let project: Value = test::read_body_json(resp).await;
    let project_id = project["id"].as_str().unwrap().to_string();
    assert_eq!(project["status"], "ACTIVE");
    assert_eq!(project["members"][0]["role"], "OWNER");

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}/statuses", project_id))
        .to_request();
    let statuses: Value = test::call_and_read_body_json(&app, req).await;
    let titles: Vec<&str> = statuses.as_array().unwrap().iter().map(|s| s["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["Planning", "In Progress", "Review", "Completed"]);

    let req = test::TestRequest::put()
        .uri(&format!("/api/projects/{}", project_id))
        .set_json(json!({ "status": "ON_HOLD", "client": "Acme" }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["status"], "ON_HOLD");
    assert_eq!(updated["client"], "Acme");
    assert_eq!(updated["name"], "Website");

    let req = test::TestRequest::get().uri("/api/projects?status=ON_HOLD").to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed["pagination"]["total"], 1);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/projects/{}", project_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}", project_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_second_running_timer_is_rejected() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "worker@company.com" }))
        .to_request();
    let user: Value = test::call_and_read_body_json(&app, req).await;
    let user_id = user["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/projects")
        .set_json(json!({ "name": "Timers" }))
        .to_request();
    let project: Value = test::call_and_read_body_json(&app, req).await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let entry = json!({
        "userId": user_id,
        "description": "Coding",
        "startTime": "2024-11-15T09:00:00Z",
        "isRunning": true
    });

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/time-entries", project_id))
        .set_json(&entry)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/time-entries", project_id))
        .set_json(&entry)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "User already has a running timer");

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/time-entries", project_id))
        .set_json(json!({
            "userId": user_id,
            "description": "Review",
            "startTime": "2024-11-14T09:00:00Z",
            "endTime": "2024-11-14T10:00:00Z"
        }))
        .to_request();
    let stopped: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stopped["isRunning"], false);

    // Restarting a stopped entry is also a second running timer.
    let req = test::TestRequest::put()
        .uri(&format!("/api/projects/{}/time-entries/{}", project_id, stopped["id"].as_str().unwrap()))
        .set_json(json!({ "isRunning": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "User already has a running timer");

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}/time-entries?isRunning=true", project_id))
        .to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed["pagination"]["total"], 1);
}

#[actix_rt::test]
async fn test_project_thread_messages_and_day_timeline() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "poster@company.com", "name": "Poster" }))
        .to_request();
    let user: Value = test::call_and_read_body_json(&app, req).await;
    let user_id = user["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/projects")
        .set_json(json!({ "name": "Discussions" }))
        .to_request();
    let project: Value = test::call_and_read_body_json(&app, req).await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/threads", project_id))
        .set_json(json!({ "title": "Design review", "tags": ["design"], "userId": user_id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let thread: Value = test::read_body_json(resp).await;
    let thread_id = thread["id"].as_str().unwrap().to_string();
    assert_eq!(thread["tags"][0]["name"], "design");

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/threads/{}/messages", project_id, thread_id))
        .set_json(json!({ "content": "First pass is up", "userId": user_id }))
        .to_request();
    let parent: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/threads/{}/messages", project_id, thread_id))
        .set_json(json!({ "content": "Looks good", "userId": user_id, "parentId": parent["id"] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}/threads/{}/messages", project_id, thread_id))
        .to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed["pagination"]["total"], 1);
    assert_eq!(listed["messages"][0]["replies"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}/timeline", project_id))
        .to_request();
    let timeline: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(timeline["pagination"]["total"], 2);
    let days = timeline["timeline"].as_array().unwrap();
    let grouped: usize = days.iter().map(|d| d["messages"].as_array().unwrap().len()).sum();
    assert_eq!(grouped, 2);
}

#[actix_rt::test]
async fn test_similar_import_without_key_conflicts() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(without_thread_key(manual_payload("similar", "Vendor contract", "john@company.com")))
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    let thread_id = first["thread"]["id"].as_str().unwrap().to_string();

    // Same subject and participants, no thread key.
    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(without_thread_key(manual_payload("again", "Vendor contract", "john@company.com")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["threadId"], thread_id.as_str());

    // A different subject is a different conversation.
    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(without_thread_key(manual_payload("other", "Vendor invoice", "john@company.com")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    // allowDuplicate skips the similarity check and stores a new thread.
    let mut payload = without_thread_key(manual_payload("dup", "Vendor contract", "john@company.com"));
    payload["options"]["allowDuplicate"] = json!(true);
    let req = test::TestRequest::post().uri("/api/email-import").set_json(payload).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_ne!(body["thread"]["id"], thread_id.as_str());

    assert_eq!(count_rows(&pool, "email_threads").await, 3);
}

#[actix_rt::test]
async fn test_allow_duplicate_merges_into_keyed_thread() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/email-import")
        .set_json(with_tags(manual_payload("merge", "Merge", "john@company.com"), &["client"]))
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    let thread_id = first["thread"]["id"].as_str().unwrap().to_string();
    assert_eq!(first["thread"]["participants"].as_array().unwrap().len(), 3);

    let follow_up = json!({
        "source": "manual",
        "data": {
            "subject": "Merge",
            "threadId": "merge",
            "tags": [{ "name": "urgent" }],
            "messages": [{
                "messageId": "merge-4",
                "from": "carol@company.com",
                "to": ["john@company.com"],
                "subject": "Re: Merge",
                "body": "<p>Fourth</p>",
                "timestamp": "2024-11-15T13:00:00Z",
                "parentMessageId": "merge-1"
            }]
        },
        "options": { "allowDuplicate": true }
    });

    // Without the option the same key is a conflict.
    let mut rejected = follow_up.clone();
    rejected["options"]["allowDuplicate"] = json!(false);
    let req = test::TestRequest::post().uri("/api/email-import").set_json(rejected).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::post().uri("/api/email-import").set_json(follow_up).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let merged: Value = test::read_body_json(resp).await;

    assert_eq!(merged["thread"]["id"], thread_id.as_str());
    assert_eq!(merged["importedMessages"], 1);
    assert_eq!(merged["thread"]["messageCount"], 4);

    let mut emails: Vec<&str> = merged["thread"]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["email"].as_str().unwrap())
        .collect();
    emails.sort();
    assert_eq!(emails, vec!["carol@company.com", "john@company.com"]);

    let tags: Vec<&str> = merged["thread"]["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["urgent"]);

    assert_eq!(count_rows(&pool, "email_threads").await, 1);
    let parent_links = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM email_messages WHERE message_id = 'merge-4' AND parent_message_id IS NOT NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(parent_links, 1);
}

#[actix_rt::test]
async fn test_delete_project_cascades_to_owned_rows() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/users")
        .set_json(json!({ "email": "lead@company.com", "name": "Lead" }))
        .to_request();
    let user: Value = test::call_and_read_body_json(&app, req).await;
    let user_id = user["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/projects")
        .set_json(json!({ "name": "Cascade", "createdBy": user_id }))
        .to_request();
    let project: Value = test::call_and_read_body_json(&app, req).await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/tasks", project_id))
        .set_json(json!({ "title": "Write copy" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/time-entries", project_id))
        .set_json(json!({ "userId": user_id, "description": "Copy", "startTime": "2024-11-15T09:00:00Z", "isRunning": true }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/threads", project_id))
        .set_json(json!({ "title": "Kickoff", "tags": ["planning"], "userId": user_id }))
        .to_request();
    let thread: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/projects/{}/threads/{}/messages", project_id, thread["id"].as_str().unwrap()))
        .set_json(json!({ "content": "Agenda attached", "userId": user_id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/email-threads")
        .set_json(json!({ "subject": "Client brief", "projectId": project_id }))
        .to_request();
    let email_thread: Value = test::call_and_read_body_json(&app, req).await;
    let email_thread_id = email_thread["id"].as_str().unwrap().to_string();
    assert_eq!(email_thread["projectId"], project_id.as_str());

    let req = test::TestRequest::delete()
        .uri(&format!("/api/projects/{}", project_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["projects"], 0);
    assert_eq!(stats["tasks"], 0);
    assert_eq!(stats["timeEntries"], 0);
    assert_eq!(stats["projectThreads"], 0);
    assert_eq!(stats["threadMessages"], 0);
    assert_eq!(stats["users"], 1);
    assert_eq!(count_rows(&pool, "project_statuses").await, 0);
    assert_eq!(count_rows(&pool, "project_members").await, 0);
    assert_eq!(count_rows(&pool, "project_thread_tags").await, 0);

    // Email threads survive and lose the link.
    let req = test::TestRequest::get()
        .uri(&format!("/api/email-threads/{}", email_thread_id))
        .to_request();
    let detail: Value = test::call_and_read_body_json(&app, req).await;
    assert!(detail["projectId"].is_null());
}

#[actix_rt::test]
async fn test_huge_page_reads_past_the_end() {
    let pool = test_pool().await;
    let app = init_app!(pool);

    let req = test::TestRequest::post()
        .uri("/api/projects")
        .set_json(json!({ "name": "Paging" }))
        .to_request();
    let project: Value = test::call_and_read_body_json(&app, req).await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects?page={}", i64::MAX))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listed: Value = test::read_body_json(resp).await;
    assert!(listed["projects"].as_array().unwrap().is_empty());
    assert_eq!(listed["pagination"]["total"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/projects/{}/time-entries?page={}&limit=200", project_id, i64::MAX))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let entries: Value = test::read_body_json(resp).await;
    assert!(entries["timeEntries"].as_array().unwrap().is_empty());
}
