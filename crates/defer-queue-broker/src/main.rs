use axum::Router;
use clap::Parser;
use defer_queue_broker::{metrics::BrokerMetrics, Broker, BrokerConfig};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dq-broker")]
#[command(about = "Deferred task queue broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "broker.yaml")]
    config: String,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Prometheus port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.monitoring.prometheus_port = metrics_port;
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    // Start metrics server
    let metrics = broker.metrics();
    let metrics_port = config.monitoring.prometheus_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_broker.shutdown();
        }
    });

    broker.run().await?;

    Ok(())
}

async fn start_metrics_server(metrics: Arc<BrokerMetrics>, port: u16) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get};

    async fn metrics_handler(
        State(metrics): State<Arc<BrokerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        let encoder = TextEncoder::new();
        let metric_families = metrics.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
