//! hookrelay library
//!
//! Webhook ingestion gateway: deliveries arrive on `/h/:id`, are queued, and
//! run through the hook's ordered chain of components, each in its own
//! store transaction.

pub mod cli;
pub mod components;
pub mod config;
pub mod crypto;
pub mod hooks;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod store;
