mod routes;
mod server;
mod telemetry;

pub mod annotate;
pub mod app;
pub mod config;
pub mod detection;
pub mod detector;
pub mod generation;

pub use app::start_app;
