// Application state and the serving loop
pub mod state;

pub use state::AppState;

use std::future::Future;
use std::io;

use axum::Router;
use tokio::net::TcpListener;

/// Serve the router until `shutdown` resolves, then stop accepting new
/// connections and drain the in-flight ones before returning.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
