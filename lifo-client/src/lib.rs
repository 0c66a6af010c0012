#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Async client for the lifo stack server.
//!
//! Each push or pop is one short-lived TCP connection, matching the server's
//! one request per connection model.

mod client;
mod error;

pub use client::{ClientConfig, StackClient, fetch_diagnostics};
pub use error::{ClientError, Result};
pub use lifo_core::{DiagnosticSnapshot, MAX_PAYLOAD_LEN};
