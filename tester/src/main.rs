//! Manual smoke harness: run the rail engine against a live backend and
//! watch the gate move. Simulated cart adds and a logout exercise the
//! debounce and teardown paths.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use api::{SessionId, StoreApi};
use clap::Parser;
use engine::{EngineConfig, ExternalSignal, FileIdentityStore, Gate, NoVisibility};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Base URL of the storefront backend, e.g. http://localhost:5000/api
    base_url: String,

    /// Directory holding the persisted client state (the "user" record and
    /// the session id).
    #[arg(long, default_value = ".state")]
    state_dir: PathBuf,

    /// Number of simulated cart adds to fire in a burst.
    #[arg(long, default_value_t = 3)]
    cart_adds: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.state_dir)?;

    let session = SessionId::load_or_create(&args.state_dir.join("session_id"));
    let backend = Arc::new(StoreApi::new(args.base_url, session));
    let store = Arc::new(FileIdentityStore::new(&args.state_dir));

    let handle = engine::spawn(backend, store, NoVisibility, EngineConfig::load());
    let mut gate = handle.gate();

    info!("Engine running, initial gate: {}", summary(&gate.borrow()));

    info!("Firing {} cart adds in a burst", args.cart_adds);
    for _ in 0..args.cart_adds {
        handle.notify_cart_add();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let watcher = tokio::spawn(async move {
        while gate.changed().await.is_ok() {
            let current = gate.borrow().clone();
            info!("Gate changed: {}", summary(&current));
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;

    info!("Signalling logout");
    handle.signal(ExternalSignal::LoggedOut);
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.shutdown();
    watcher.abort();
    Ok(())
}

fn summary(gate: &Gate) -> String {
    match gate {
        Gate::Loading => "loading".to_string(),
        Gate::Hidden => "hidden".to_string(),
        Gate::Visible(products) => format!(
            "visible ({} products: {})",
            products.len(),
            products
                .iter()
                .map(|p| p.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
