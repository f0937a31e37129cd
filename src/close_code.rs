/// A WebSocket close status code.
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000, the purpose of the connection has been fulfilled.
    Normal,
    /// 1001, the endpoint is going away.
    Away,
    /// 1002, the endpoint received a frame that violates the protocol.
    Protocol,
    /// 1003, the endpoint cannot accept this type of data.
    Unsupported,
    /// 1005, no status code was present. Never sent on the wire.
    Status,
    /// 1006, the connection was dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007, a text message carried invalid UTF-8.
    Invalid,
    /// 1008, the message violates the endpoint's policy.
    Policy,
    /// 1009, the message is too big to process.
    Size,
    /// 1010, the client expected an extension the server did not negotiate.
    Extension,
    /// 1011, the server hit an unexpected condition.
    Error,
    /// 1012, the server is restarting.
    Restart,
    /// 1013, the server is overloaded, try again later.
    Again,
    #[doc(hidden)]
    Tls,
    #[doc(hidden)]
    Reserved(u16),
    #[doc(hidden)]
    Iana(u16),
    #[doc(hidden)]
    Library(u16),
    #[doc(hidden)]
    Bad(u16),
}

impl CloseCode {
    /// Returns `false` for codes that must not appear in a close frame.
    pub const fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Bad(_)
                | CloseCode::Reserved(_)
                | CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
        )
    }

    pub(crate) const fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            1016..=2999 => Self::Reserved(code),
            3000..=3999 => Self::Iana(code),
            4000..=4999 => Self::Library(code),
            _ => Self::Bad(code),
        }
    }

    pub(crate) const fn into_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::Status => 1005,
            Self::Abnormal => 1006,
            Self::Invalid => 1007,
            Self::Policy => 1008,
            Self::Size => 1009,
            Self::Extension => 1010,
            Self::Error => 1011,
            Self::Restart => 1012,
            Self::Again => 1013,
            Self::Tls => 1015,
            Self::Reserved(code) | Self::Iana(code) | Self::Library(code) | Self::Bad(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.into_u16()
    }
}
