// Document Analyzer - financial document analysis service with inline and queued execution

pub mod analysis;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod jobs;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
