//! Server module
//!
//! Ingress and admin HTTP listeners.

pub mod admin;
pub mod auth;
pub mod http;
pub mod startup;

pub use admin::{create_admin_router, AdminConfig};
pub use http::{create_router, HttpConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
