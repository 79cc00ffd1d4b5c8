//! HTTP surface: client log ingestion, recent logs, generation and health

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;
pub mod validation;

pub use error::ApiError;
pub use server::{router, run};
pub use state::AppState;
