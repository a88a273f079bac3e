pub mod config;
pub mod error;
pub mod handlers;
pub mod invalidator;
pub mod loader;
pub mod lock;
pub mod migrations;
pub mod models;
pub mod run_store;
pub mod scheduler;
pub mod source;
pub mod transform;
pub mod views;

use std::sync::Arc;

use scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}
