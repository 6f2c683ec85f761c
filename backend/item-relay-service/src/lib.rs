pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod registry;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::*;
pub use state::AppState;
pub use websocket::{ConnectionHub, PushMessage};
