use std::sync::Arc;

use mompick::{app_state::AppState, config::Config, routes::make_router, tracing::setup_tracing};

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("failed to read configuration");
    let _guard = setup_tracing(&config);

    let bind_addr = config.bind_addr;
    let state = AppState::from_config(config).expect("failed to set up app state");
    let app = make_router().with_state(Arc::new(state));

    tracing::info!("listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
