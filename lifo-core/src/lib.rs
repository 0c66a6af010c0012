#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod admission;
mod error;
mod halt;
mod payload;
pub mod protocol;
mod registry;
mod snapshot;
mod stack;

pub use admission::{AdmissionConfig, AdmissionController, AdmissionDecision};
pub use error::{LifoError, Result};
pub use halt::HaltFlag;
pub use payload::{MAX_PAYLOAD_LEN, Payload};
pub use protocol::{Phase, ProtocolSession, SessionEvent};
pub use registry::{ConnectionId, ConnectionRecord, ConnectionRegistry, DisconnectHandle};
pub use snapshot::DiagnosticSnapshot;
pub use stack::BoundedStack;
