#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! The lifo stack server: listeners, per-connection tasks, the diagnostic
//! endpoint and the shutdown sequence. Stack, protocol and admission logic
//! live in `lifo-core`.

pub mod args;
pub mod config;
pub mod diagnostics;
pub mod server;
pub mod shutdown;

pub use args::Args;
pub use config::Config;
