//! Churn prediction service.
//!
//! Accepts CSV uploads over HTTP, trains random-forest churn models on a
//! background worker pool, and serves predictions from the latest published model.

pub mod config;
pub mod error;
pub mod queue;
pub mod server;
pub mod worker;

pub use config::Config;
pub use error::{ApiError, Result, ServerError};
