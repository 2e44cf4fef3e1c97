use thiserror::Error;

/// Errors raised while opening or using a link to the node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Wrapper around IO errors (socket connect, read, write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect or handshake did not finish in time.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The session was closed or the peer went away.
    #[error("link closed")]
    Closed,

    /// The session is up but has not learned enough from the node yet.
    #[error("not ready: {0}")]
    NotReady(&'static str),

    /// Protobuf encode failure on the outbound path.
    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Protobuf decode failure on the inbound path.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Serial port could not be opened or configured.
    #[error("serial error: {0}")]
    Serial(String),

    /// Auto-detection found no candidate serial device.
    #[error("no serial device found")]
    NoSerialPort,

    /// Descriptor does not describe something this transport can open.
    #[error("unsupported address: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// True for errors that mean the peer dropped the stream under us.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Closed => true,
            _ => false,
        }
    }
}

/// Errors from a subnet scan. None of these are fatal; callers treat them as
/// "node not found".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Only TCP links can be relocated by scanning.
    #[error("last connection was not TCP")]
    NotTcp,

    /// Symbolic host names are assumed address-stable.
    #[error("address '{0}' is not a numeric IPv4 address")]
    NotNumeric(String),

    /// Nothing in the subnet answered on the control port.
    #[error("no responders on {0}")]
    NoResponders(String),

    /// Some hosts answered but none reported the wanted short name.
    #[error("no node named '{0}' found")]
    NoMatch(String),
}

/// Malformed sub-command arguments. Rendered to the user as a hint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("missing date")]
    MissingDate,
    #[error("invalid date '{0}'")]
    InvalidDate(String),
    #[error("missing time")]
    MissingTime,
    #[error("invalid time '{0}'")]
    InvalidTime(String),
}

pub const WX4_USAGE: &str =
    "No Date, please insert date\n(Format- WX4 YYYY-MM-DD)\n(for example, WX4 2026-03-09)";
pub const WX5_USAGE: &str =
    "No Time, please insert time\n(Format- WX5 HH:MM)\n(for example, WX5 14:00)";

impl CommandError {
    /// User-visible usage hint for this error.
    pub fn hint(&self) -> &'static str {
        match self {
            CommandError::MissingDate | CommandError::InvalidDate(_) => WX4_USAGE,
            CommandError::MissingTime | CommandError::InvalidTime(_) => WX5_USAGE,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryError {
    /// A recovery task is already in flight.
    #[error("a recovery is already running")]
    AlreadyRunning,
}
