use actix_cors::Cors;
use actix_files as fs;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::path::Path;

use projecthub_backend::{config::Config, db, handlers};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();

    log::info!("Starting ProjectHub backend...");
    log::info!("Server starting on http://{}:{}", config.server_host, config.server_port);

    let pool = db::create_pool(&config.database_url)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    db::run_migrations(&pool)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let static_dir = config
        .static_dir
        .clone()
        .filter(|dir| Path::new(dir).is_dir());
    match (&config.static_dir, &static_dir) {
        (Some(dir), None) => log::warn!("Static directory {} not found, not serving static files", dir),
        (_, Some(dir)) => log::info!("Serving static files from {}", dir),
        _ => {}
    }

    let bind = (config.server_host.clone(), config.server_port);
    let workers = config.workers;

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let app = App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(handlers::configure);

        match &static_dir {
            Some(dir) => app.service(fs::Files::new("/", dir).index_file("index.html")),
            None => app,
        }
    })
    .workers(workers)
    .bind(bind)?
    .run()
    .await
}
