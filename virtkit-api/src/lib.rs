// Library entry point for tests and external usage

pub mod app;
pub mod handlers;
pub mod routes;

pub use app::AppState;
