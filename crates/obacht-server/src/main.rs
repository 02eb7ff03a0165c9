use tracing_subscriber::EnvFilter;

use obacht_server::config::ServerConfig;
use obacht_server::{build_app, spawn_janitor};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env();
    if std::env::var("OBACHT_LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Obacht server starting");

    let config = match ServerConfig::load().with_args(std::env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "Bad command line");
            std::process::exit(1);
        },
    };
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Refusing to start");
        std::process::exit(1);
    }

    let listen_addr = config.listen_addr.clone();
    let (app, state) = build_app(config);
    spawn_janitor(state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
