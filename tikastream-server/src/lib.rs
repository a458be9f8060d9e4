// The extraction pipeline itself lives in tikastream-core.
// This crate wires it to HTTP and the command line.

pub mod app;
pub mod body;
pub mod config;
pub mod engine_manager;
pub mod ingress;

// Re-export core types for convenience
pub use tikastream_core::*;

pub use app::{build_app, build_extractor, AppState};
pub use config::{EngineArgs, ServeArgs, ServerConfig};
pub use engine_manager::EngineManager;
pub use ingress::{IngressError, IngressLimits};
