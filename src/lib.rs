mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod classifier;
pub mod config;
pub mod labels;
pub mod layers;
pub mod model_service;
pub mod ort_service;
pub mod preprocess;

pub use app::start_app;
