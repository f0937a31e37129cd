use crate::error::DecodeError;

/// The type tag of a WebSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text payload.
    Text = 0x1,
    /// Binary payload.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Keepalive request.
    Ping = 0x9,
    /// Keepalive answer.
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for close, ping and pong.
    pub const fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub(crate) const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            opcode => Err(DecodeError::InvalidOpCode { opcode }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values() {
        for opcode in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::try_from(opcode.into_u8()).unwrap(), opcode);
        }

        assert_eq!(OpCode::Close.into_u8(), 0x8);
    }

    #[test]
    fn reserved_opcodes_are_rejected() {
        for value in [0x3, 0x7, 0xB, 0xF] {
            assert!(matches!(
                OpCode::try_from(value),
                Err(DecodeError::InvalidOpCode { opcode }) if opcode == value
            ));
        }
    }
}
