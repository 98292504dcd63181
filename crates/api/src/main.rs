use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use windledger_api::app::{self, services};
use windledger_api::config::ApiConfig;
use windledger_infra::jobs::DeliveryWorker;

const DELIVERY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    windledger_observability::init();

    let config = ApiConfig::from_env();
    let bind_addr = config.bind_addr;
    let services = Arc::new(services::build_services(config));

    let worker = DeliveryWorker::new(services.jobs.clone())
        .spawn(DELIVERY_POLL_INTERVAL, services::log_delivery)
        .context("failed to start delivery worker")?;

    let app = app::build_app_with(services);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    worker.shutdown();
    served.context("server error")
}
