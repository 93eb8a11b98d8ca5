use std::sync::Arc;

use tracing::info;

mod connector;
mod db;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&database_url).await.expect("database connection failed");

    let connector = Arc::new(connector::PgConnector::new(pool.clone()));
    let state = state::AppState::new(pool, connector);

    services::persistence::spawn_flush_task(
        state.clone(),
        services::persistence::FlushConfig::from_env(),
    );

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind");
    info!(%addr, "listening");
    axum::serve(listener, routes::app(state)).await.expect("server failed");
}
