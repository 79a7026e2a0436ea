pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod task;
pub mod transaction;

pub use config::Config;
pub use error::{Error, Result};
pub use transaction::with_transaction;
