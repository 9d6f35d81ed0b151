use actix_web::{web, HttpResponse};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::services::email_import::ImportRequest;
use crate::services::ImportService;

pub async fn import_email(pool: web::Data<SqlitePool>, body: web::Json<ImportRequest>) -> Result<HttpResponse> {
    let service = ImportService::new(pool.get_ref().clone());
    let outcome = service.import(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(outcome))
}
