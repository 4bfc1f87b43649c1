//! Wire opcodes and authentication types.

/// One-byte opcode that starts every HostConnect frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Server opens the handshake with it; the host answers with it.
    Authenticate = 0,
    /// Zero-payload liveness frame, either direction.
    KeepAlive = 1,
    /// Host → server: 4-byte length + opaque status payload.
    HostStatus = 2,
    /// Server → host: ask the host to open a proxied web socket.
    WebSocketConnectionRequest = 3,
    /// Server → host: the previous opcode was not understood.
    ErrorCommandCodeUnknown = 255,
}

impl Command {
    /// Wire value.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a wire value; `None` for opcodes this server does not know.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Command::Authenticate),
            1 => Some(Command::KeepAlive),
            2 => Some(Command::HostStatus),
            3 => Some(Command::WebSocketConnectionRequest),
            255 => Some(Command::ErrorCommandCodeUnknown),
            _ => None,
        }
    }
}

/// How a host proves its identity during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Installed host with a long-lived key pair. Must sign the challenge.
    PermanentHost,
    /// Short-lived host session. No signature required.
    TemporaryHost,
    /// Any value this server does not recognise. Treated as non-permanent.
    Unrecognized(u8),
}

impl AuthenticationType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => AuthenticationType::PermanentHost,
            1 => AuthenticationType::TemporaryHost,
            other => AuthenticationType::Unrecognized(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            AuthenticationType::PermanentHost => 0,
            AuthenticationType::TemporaryHost => 1,
            AuthenticationType::Unrecognized(other) => other,
        }
    }

    /// Whether the signature and public key are mandatory and checked.
    #[inline]
    pub fn requires_signature(self) -> bool {
        self == AuthenticationType::PermanentHost
    }
}
