//! Server module for Gasoline
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `routes`: axum router for the extension, `/mcp` and daemon control
//! - `lifecycle`: process probe, `--stop`, `--force`, port checks
//! - `init`: startup arbitration, run loop and teardown

pub mod config;
mod init;
mod lifecycle;
mod loader;
mod routes;

// Re-export public API
pub use init::{run, ServeOptions};
pub use lifecycle::{run_force, run_stop};
pub use loader::load_config;
