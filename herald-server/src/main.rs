use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use herald_core::controller::{EngineDeps, RunController};
use herald_core::gateway::RestGatewayFactory;

mod routes;
mod store;

use routes::{router, AppState};
use store::JsonFileStore;

#[derive(Parser, Debug, Clone)]
#[command(name = "herald")]
#[command(author, version, about = "Herald - scheduled advertisement engine with a REST control surface")]
struct Args {
    /// Address to bind the REST API
    #[arg(long, default_value = "127.0.0.1:8080", env = "HERALD_BIND")]
    bind: String,

    /// Path of the JSON state file
    #[arg(long, default_value = "herald-state.json", env = "HERALD_STATE")]
    state_file: String,

    /// Base URL of the destination platform's REST API
    #[arg(
        long,
        default_value = "https://discord.com/api/v9",
        env = "HERALD_API_BASE"
    )]
    api_base: String,

    /// Start the advertiser immediately if the stored configuration allows
    #[arg(long, default_value = "false")]
    autostart: bool,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("herald=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!(
        "Herald starting. bind={}, state_file={}",
        args.bind, args.state_file
    );

    let store = Arc::new(JsonFileStore::open(&args.state_file)?);
    let controller = Arc::new(RunController::new(EngineDeps {
        config_repo: store.clone(),
        credential_repo: store.clone(),
        destination_repo: store.clone(),
        proxy_repo: store.clone(),
        gateway_factory: Arc::new(RestGatewayFactory::new(args.api_base.clone())),
    }));

    if args.autostart {
        let outcome = controller.start().await;
        if !outcome.success {
            error!("autostart failed: {}", outcome.message);
        }
    }

    let state = AppState {
        controller: controller.clone(),
        store,
    };
    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr: SocketAddr = args.bind.parse()?;
    info!("REST API listening on http://{}", addr);

    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = controller.stop().await;
                handle.graceful_shutdown(Some(Duration::from_secs(5)));
            }
        });
    }

    axum_server::Server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Herald shut down.");
    Ok(())
}
