mod config;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    secrecy::Secret,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    zapflow_ai::{CompletionProvider, OpenAiCompatProvider},
    zapflow_broadcast::BroadcastDispatcher,
    zapflow_gateway::AppState,
    zapflow_sessions::SessionManager,
    zapflow_store::{Store, sqlite::SqliteStore},
    zapflow_transport::{Transport, sidecar::SidecarTransport},
};

#[derive(Parser)]
#[command(name = "zapflow", about = "zapflow — conversational automation runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file.
    #[arg(long, global = true, env = "ZAPFLOW_CONFIG", default_value = "zapflow.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "ZAPFLOW_LOG", default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime and its HTTP surface.
    Serve {
        /// Bind address override.
        #[arg(long)]
        bind: Option<String>,
        /// Port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the config file and print the effective settings.
    CheckConfig,
}

fn init_tracing(log_level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zapflow={log_level},info")));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let cfg = config::load(&cli.config)?;

    match cli.command {
        Commands::CheckConfig => {
            println!("{cfg:#?}");
            Ok(())
        },
        Commands::Serve { bind, port } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let port = port.unwrap_or(cfg.server.port);
            serve(cfg, &bind, port).await
        },
    }
}

async fn serve(cfg: config::Config, bind: &str, port: u16) -> anyhow::Result<()> {
    // Persistence.
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&cfg.database.path)
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", cfg.database.path))?;
    let store = SqliteStore::new(pool);
    store.migrate().await.context("database migration failed")?;
    let store: Arc<dyn Store> = Arc::new(store);

    // Transport sidecar.
    let (transport, events, disconnect_rx) =
        SidecarTransport::connect_with_retry(cfg.sidecar.port, cfg.sidecar.connect_retries)
            .await
            .context("could not reach the automation sidecar")?;
    let transport: Arc<dyn Transport> = Arc::new(transport);

    // Optional AI fallback provider.
    let ai: Option<Arc<dyn CompletionProvider>> = if cfg.ai.enabled {
        match std::env::var(&cfg.ai.api_key_env) {
            Ok(key) => Some(Arc::new(OpenAiCompatProvider::new(
                Secret::new(key),
                cfg.ai.model.clone(),
                cfg.ai.base_url.clone(),
            ))),
            Err(_) => {
                warn!(env = %cfg.ai.api_key_env, "ai enabled but key env is unset, disabling");
                None
            },
        }
    } else {
        None
    };

    // Session runtime.
    let mut manager = SessionManager::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        cfg.session.to_manager_config(),
    );
    if let Some(provider) = ai {
        manager = manager.with_ai(provider);
    }
    let sessions = Arc::new(manager);
    tokio::spawn(Arc::clone(&sessions).run(events));

    for account_id in &cfg.accounts {
        sessions.create(account_id).await;
    }

    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        cfg.broadcast.to_dispatcher_config(),
    ));

    // HTTP surface.
    let app = zapflow_gateway::router(AppState {
        sessions,
        dispatcher,
        store,
    });
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "zapflow serving");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("http server error")?;
            Ok(())
        },
        _ = disconnect_rx => {
            anyhow::bail!("automation sidecar connection lost");
        },
    }
}
