// Authenticated HTTP client - library root

pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hooks;
pub mod http_client;
pub mod interceptor;
pub mod jsonp;
pub mod locale;
pub mod recovery;

pub use error::{ApiError, Result};
pub use http_client::{ApiClient, ClientSettings, RequestOptions};
