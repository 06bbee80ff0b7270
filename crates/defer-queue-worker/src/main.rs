use clap::Parser;
use defer_queue_core::{Codec, Map, Value};
use defer_queue_worker::{MemoryHost, ModelRegistry, Worker, WorkerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dq-worker")]
#[command(about = "Deferred task worker for one tenant database", long_about = None)]
struct Args {
    /// Database whose task queue this worker serves
    database: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Broker address
    #[arg(short, long)]
    address: Option<String>,

    /// Messages taken per receive
    #[arg(short, long)]
    prefetch: Option<usize>,
}

/// Demo models served by the in-memory host
fn demo_host(database: &str) -> anyhow::Result<MemoryHost> {
    let registry = ModelRegistry::new();
    registry.declare("party.party");
    registry.declare("res.user");
    registry.register_fn("party.party", "rename_all", |session, call| {
        let suffix = call
            .arg(0, "suffix")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let ids = session.search("party.party", &[], 0, None)?;
        for id in &ids {
            let name = session
                .get("party.party", *id)
                .and_then(|row| row.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut values = Map::new();
            values.insert("name".to_string(), Value::from(format!("{}{}", name, suffix)));
            session.write("party.party", &[*id], &values)?;
        }
        Ok(Value::Int(ids.len() as i64))
    });

    let host = MemoryHost::new(registry).with_database(database);
    for name in ["Alice", "Bob", "Carol"] {
        let mut values = Map::new();
        values.insert("name".to_string(), Value::from(name));
        host.seed(database, "party.party", values)?;
    }
    let mut admin = Map::new();
    admin.insert("name".to_string(), Value::from("Administrator"));
    admin.insert("login".to_string(), Value::from("admin"));
    host.seed(database, "res.user", admin)?;

    Ok(host)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    config.database_name = args.database;
    if let Some(address) = args.address {
        config.queue.address = address;
    }
    if let Some(prefetch) = args.prefetch {
        config.prefetch_messages = prefetch;
    }

    let host = Arc::new(demo_host(&config.database_name)?);
    tracing::info!("Declared models: {:?}", host.registry().models());

    let worker = Worker::from_config(config, host, Arc::new(Codec::standard()));

    // Handle shutdown signals
    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    worker.listen().await?;

    Ok(())
}
