use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use urlguard_engine::{
    probe::{HttpProber, NoopProber, Prober},
    routes::{self, AppState},
    DecisionEngine, Settings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "urlguard_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::load().context("failed to load configuration")?;
    info!("Loaded configuration: {:?}", settings);

    // Build the decision engine; bad weights or artifacts stop startup here
    let engine = DecisionEngine::from_settings(&settings).context("failed to build decision engine")?;

    // Network probe only when the gate or redirect counting needs it
    let prober: Arc<dyn Prober> = if settings.needs_probe() {
        Arc::new(HttpProber::new(&settings.probe).context("failed to build HTTP prober")?)
    } else {
        Arc::new(NoopProber)
    };

    // Initialize metrics recorder
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // Build router
    let state = Arc::new(AppState {
        engine,
        prober,
        probe_redirects: settings.probe.follow_redirects,
        metrics: Some(metrics),
    });
    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = settings
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid server.bind_addr {:?}", settings.server.bind_addr))?;
    info!("Starting URL risk engine on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
