use bytes::Bytes;
use rand::Rng;

use crate::{Frame, OpCode};

/// The side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake. Masks every outbound frame.
    Client,
    /// Accepts the handshake. Never masks.
    Server,
}

impl Role {
    /// Returns a fresh random mask key for a client, `None` for a server.
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        match self {
            Role::Client => Some(rand::rng().random()),
            Role::Server => None,
        }
    }

    /// Builds a final outbound frame masked according to this role.
    pub(crate) fn frame(&self, opcode: OpCode, payload: impl Into<Bytes>) -> Frame {
        Frame::new(true, opcode, self.mask_key(), payload.into())
    }

    /// Whether frames received by this role are expected to carry a mask.
    pub(crate) const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }
}
