#[macro_use]
extern crate diesel;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    config::Config,
    database::{connection_pool, run_migrations, PgFeedbackStore},
    openapi::ApiDoc,
    routes::AppState,
};

mod aggregation;
mod config;
mod database;
mod db_models;
mod error;
mod models;
mod openapi;
mod routes;
mod schema;
mod store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = match connection_pool(&config).and_then(|pool| run_migrations(&pool).map(|_| pool)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to prepare database");
            std::process::exit(1);
        }
    };

    let state = web::Data::new(AppState::new(
        Arc::new(PgFeedbackStore::new(pool)),
        config.store_timeout,
    ));
    let openapi = ApiDoc::openapi();

    tracing::info!(port = config.http_port, "starting kiosk feedback api");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(routes::config)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()))
    })
    .bind(("0.0.0.0", config.http_port))?
    .run()
    .await
}
