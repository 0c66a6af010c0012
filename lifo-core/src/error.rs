use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {0} bytes exceeds the 127 byte maximum")]
    PayloadTooLarge(usize),

    #[error("Idle timeout after {0} seconds")]
    IdleTimeout(u64),

    #[error("Operation abandoned: server is halting")]
    Halted,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LifoError {
    /// Transport faults end the connection they occurred on and nothing else.
    #[must_use]
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Io(_) | Self::IdleTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, LifoError>;
