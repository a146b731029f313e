//! Kiln - Sandboxed build-and-run service
//!
//! Takes untrusted script text, embeds it in a throwaway project, builds and
//! runs it under a deadline, and returns what it printed. Results are cached
//! by content hash and the heavy dependency is prebuilt once into a shared
//! template.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod process;
pub mod render;
pub mod request;
pub mod server;
pub mod service;
pub mod ui;
pub mod workspace;

pub use error::{KilnError, KilnResult};
pub use service::{GenerationService, Generated};
