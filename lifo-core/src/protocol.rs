//! Push/pop wire protocol.
//!
//! One request per connection. The first byte selects the operation:
//!
//! ```text
//!  request   byte 0                          bytes 1..=L
//!  pop       1xxx_xxxx (0x80 by convention)  -
//!  push      0LLL_LLLL                       L payload bytes, any fragmentation
//!
//!  response  byte 0                          bytes 1..=L
//!  pop       0LLL_LLLL                       L payload bytes
//!  push      0x00                            -
//!  rejected  0xFF                            -
//! ```
//!
//! [`ProtocolSession`] is sans-I/O: the connection task feeds it each read and
//! acts on the returned [`SessionEvent`].

use crate::payload::{MAX_PAYLOAD_LEN, Payload};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

pub const POP_FLAG: u8 = 0x80;
pub const POP_REQUEST: u8 = POP_FLAG;
pub const PUSH_ACK: u8 = 0x00;
pub const ADMISSION_REJECTED: u8 = 0xFF;
pub const LENGTH_MASK: u8 = 0x7F;

/// Encode a push request: header byte followed by the payload.
#[must_use]
pub fn encode_push_request(payload: &Payload) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.extend_from_slice(&[payload.wire_len()]);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Encode a pop response: length header followed by the payload.
#[must_use]
pub fn encode_pop_response(payload: &Payload) -> Bytes {
    // Same layout as a push request; the high bit is clear in both.
    encode_push_request(payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the header byte
    Start,
    /// Accumulating push payload bytes
    Pushing,
    /// Pop request received
    Popping,
    /// Push payload fully received
    Complete,
    /// Connection is going away; inbound data is ignored
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Request not complete yet
    NeedMore,
    /// A full push request arrived
    Push(Payload),
    /// A pop request arrived
    Pop,
    /// Data dropped because the session is disconnecting
    Ignored,
    /// Data arrived in a phase that does not accept it and was dropped
    Anomaly(Phase),
}

/// Per-connection request parser.
#[derive(Debug)]
pub struct ProtocolSession {
    phase: Phase,
    fragments: Vec<Bytes>,
    received: usize,
    declared_len: usize,
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            fragments: Vec::new(),
            received: 0,
            declared_len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Payload length announced by the push header.
    #[inline]
    #[must_use]
    pub fn declared_len(&self) -> usize {
        self.declared_len
    }

    /// Payload bytes accumulated so far.
    #[inline]
    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    /// Move to `Disconnecting` and release buffered fragments.
    pub fn mark_disconnecting(&mut self) {
        self.phase = Phase::Disconnecting;
        self.fragments.clear();
    }

    /// Feed one delivery from the transport.
    pub fn on_data(&mut self, chunk: &[u8]) -> SessionEvent {
        match self.phase {
            Phase::Start => self.on_header(chunk),
            Phase::Pushing => self.accumulate(chunk),
            Phase::Disconnecting => SessionEvent::Ignored,
            phase @ (Phase::Popping | Phase::Complete) => {
                if chunk.is_empty() {
                    return SessionEvent::NeedMore;
                }
                warn!(
                    target: "lifo::protocol",
                    phase = ?phase,
                    dropped = chunk.len(),
                    "Data received after request was complete, dropping"
                );
                SessionEvent::Anomaly(phase)
            },
        }
    }

    fn on_header(&mut self, chunk: &[u8]) -> SessionEvent {
        let Some((&header, rest)) = chunk.split_first() else {
            return SessionEvent::NeedMore;
        };

        if header & POP_FLAG != 0 {
            self.phase = Phase::Popping;
            if !rest.is_empty() {
                debug!(
                    target: "lifo::protocol",
                    dropped = rest.len(),
                    "Trailing bytes after pop request dropped"
                );
            }
            return SessionEvent::Pop;
        }

        self.phase = Phase::Pushing;
        self.declared_len = usize::from(header & LENGTH_MASK);
        self.fragments.clear();
        self.received = 0;
        self.accumulate(rest)
    }

    fn accumulate(&mut self, chunk: &[u8]) -> SessionEvent {
        let remaining = self.declared_len - self.received;
        let take = remaining.min(chunk.len());

        if take > 0 {
            self.fragments.push(Bytes::copy_from_slice(&chunk[..take]));
            self.received += take;
        }
        if chunk.len() > take {
            debug!(
                target: "lifo::protocol",
                dropped = chunk.len() - take,
                "Bytes beyond declared push length dropped"
            );
        }

        if self.received < self.declared_len {
            return SessionEvent::NeedMore;
        }

        self.phase = Phase::Complete;
        match Payload::new(self.assemble()) {
            Ok(payload) => SessionEvent::Push(payload),
            // declared_len comes from a 7-bit field
            Err(_) => SessionEvent::Anomaly(Phase::Complete),
        }
    }

    fn assemble(&mut self) -> Bytes {
        match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments.pop().unwrap_or_default(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.received.min(MAX_PAYLOAD_LEN));
                for fragment in self.fragments.drain(..) {
                    buf.extend_from_slice(&fragment);
                }
                buf.freeze()
            },
        }
    }
}
