use std::sync::Arc;

use clap::Parser;
use finportal::api::{self, AppState};
use finportal::config::{CliArgs, Config};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_logging(&config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics exporter unavailable");
            None
        }
    };

    let portal = Arc::new(config.build_portal());
    let warmup = portal.clone();
    match tokio::task::spawn_blocking(move || warmup.connections().init()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Storage not reachable yet, will retry on first request"),
        Err(e) => tracing::warn!(error = %e, "Connection warmup did not complete"),
    }

    let addr = match config.listen_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, host = %config.server.host, "Invalid listen address");
            std::process::exit(2);
        }
    };

    let app = api::router(AppState {
        portal: portal.clone(),
        metrics,
    });

    tracing::info!(%addr, backend = ?config.storage.backend, "API listening");

    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        });
    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    portal.close();
}
