use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use virtkit_api::app::{self, AppState};
use virtkit_api::routes;
use virtkit_hypervisor::Hypervisor;
use virtkit_manager::provision::SshDiskStager;
use virtkit_manager::storage::PgDatastore;
use virtkit_manager::{sampler, Datastore, VmManager, VmManagerConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Resolves on SIGINT (ctrl-c) or, on unix, SIGTERM; serving then drains
/// in-flight requests before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining");
}

async fn hypervisor_from_env() -> Arc<dyn Hypervisor> {
    #[cfg(feature = "libvirt")]
    {
        let uri = env_or("VIRTKIT_LIBVIRT_URI", "qemu:///system");
        match virtkit_hypervisor::libvirt::LibvirtHypervisor::connect(&uri).await {
            Ok(hv) => {
                info!(uri, "connected to libvirt");
                Arc::new(hv)
            }
            Err(e) => {
                eprintln!("Failed to connect to libvirt at {uri}: {e}");
                std::process::exit(1)
            }
        }
    }
    #[cfg(all(feature = "mock", not(feature = "libvirt")))]
    {
        tracing::warn!("no libvirt backend enabled, serving the in-memory mock hypervisor");
        Arc::new(virtkit_hypervisor::mock::MockHypervisor::new())
    }
    #[cfg(not(any(feature = "libvirt", feature = "mock")))]
    {
        eprintln!(
            "virtkit-api was built without a hypervisor backend; enable the `libvirt` or `mock` feature"
        );
        std::process::exit(1)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let hypervisor = hypervisor_from_env().await;

    let config = VmManagerConfig {
        network: env_or("VIRTKIT_NETWORK", "default"),
        image_dir: env_or("VIRTKIT_IMAGE_DIR", "/var/lib/libvirt/images"),
    };
    let stager = Arc::new(SshDiskStager::new(
        env_or("VIRTKIT_STAGING_USER", "root"),
        env_or("VIRTKIT_STAGING_HOST", "localhost"),
        config.image_dir.clone(),
    ));
    let manager = Arc::new(VmManager::new(hypervisor, stager, config));
    let store: Arc<dyn Datastore> = Arc::new(PgDatastore::new(pool));

    let interval_secs: u64 = env_or("VIRTKIT_SAMPLE_INTERVAL_SECS", "60")
        .parse()
        .expect("VIRTKIT_SAMPLE_INTERVAL_SECS must be an integer");
    tokio::spawn(sampler::run(manager.clone(), store.clone(), interval_secs));

    let state = AppState::new(manager, store);
    let router = routes::create_router(state);

    let addr: SocketAddr = env_or("VIRTKIT_HTTP_ADDR", "0.0.0.0:8001")
        .parse()
        .expect("VIRTKIT_HTTP_ADDR must be host:port");
    info!("🚀 virtkit API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    app::serve(listener, router, shutdown_signal()).await.unwrap();
}
