use crate::config::Config;
use crate::polls::{create_poll, get_poll};
use crate::session::poll_socket;
use crate::startup::AppState;
use axum::{
    Router,
    extract::Extension,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::signal::ctrl_c;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
};
use tracing_subscriber::{EnvFilter, fmt};

#[macro_use]
extern crate tracing;

mod bus;
mod config;
mod dispatcher;
mod error;
mod models;
mod polls;
mod registry;
mod session;
mod startup;
mod store;
mod votes;

pub(crate) fn router(app_state: AppState) -> Router {
    let static_files = ServeDir::new(&app_state.config.static_dir);

    Router::new()
        .route("/api/poll", post(create_poll))
        .route("/api/poll/:poll_id", get(get_poll))
        .route("/ws/:poll_id", get(poll_socket))
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE]),
        )
        .fallback_service(static_files)
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::load();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Initializing state...");
    let app_state = match AppState::new(config).await {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to initialize counter store: {e}");
            std::process::exit(1);
        }
    };

    let app = router(app_state);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Unable to spawn tcp listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
