//! Vane - embedded single-process HTTP server
//!
//! A poll-driven reactor serving pages from pluggable storage backends,
//! with server-side includes, generated expressions and form handlers.

pub mod config;
pub mod content;
pub mod error;
pub mod heap;
pub mod http;
pub mod server;
pub mod vfs;

pub use config::Config;
pub use content::{Context, Hooks};
pub use error::{ContentError, ServerError};
pub use server::session::Session;
pub use server::{Server, ServerHandle, Status};
pub use vfs::Vfs;
