//! Wire-level types and constants for the Tether RPC protocol.
//!
//! All multi-byte integers on the wire are little-endian, matching the byte
//! order of the device and of existing peer implementations.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version, exchanged in the session hello.
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic bytes opening both directions of the session hello.
pub const HELLO_MAGIC: [u8; 4] = *b"TTHR";

/// Size of the session hello in bytes: magic (4) + version (4) + budget (4).
pub const HELLO_SIZE: usize = 12;

/// Width of the NUL-padded method name field in the request header.
pub const METHOD_NAME_FIELD_SIZE: usize = 32;

/// Longest method name that fits the field with its NUL terminator.
pub const MAX_METHOD_NAME_LEN: usize = METHOD_NAME_FIELD_SIZE - 1;

/// Request header: request_id (4) + method (32) + param_count (4) + body_len (4).
pub const REQUEST_HEADER_SIZE: usize = 44;

/// Reply header: request_id (4) + outcome (4) + status (4) + buffer_count (4) + body_len (4).
pub const REPLY_HEADER_SIZE: usize = 20;

/// Per-buffer length prefix inside the reply body.
pub const RESULT_BUFFER_PREFIX_SIZE: usize = 4;

// ── Parameter tags ────────────────────────────────────────────────────────────

/// Type tag preceding every request parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamTag {
    /// Signed 8-bit scalar, 1 value byte.
    S8 = 0x00,
    /// Signed 32-bit scalar, 4 value bytes.
    S32 = 0x01,
    /// Signed 64-bit scalar, 8 value bytes.
    S64 = 0x02,
    /// Opaque buffer: 4-byte length followed by that many bytes.
    Buffer = 0x03,
}

impl TryFrom<u8> for ParamTag {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ParamTag::S8),
            0x01 => Ok(ParamTag::S32),
            0x02 => Ok(ParamTag::S64),
            0x03 => Ok(ParamTag::Buffer),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ParamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamTag::S8 => "s8",
            ParamTag::S32 => "s32",
            ParamTag::S64 => "s64",
            ParamTag::Buffer => "buffer",
        };
        f.write_str(name)
    }
}

// ── Reply outcome ─────────────────────────────────────────────────────────────

/// Protocol-level outcome of a call, carried in every reply header.
///
/// Only [`ReplyOutcome::Success`] replies carry a status code and result
/// buffers.  A failing OS call is still a `Success` at this level, with a
/// non-zero status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplyOutcome {
    /// The call executed; see the status code for the domain result.
    Success = 0,
    /// The request was malformed or named an unknown method.
    ProtocolError = 1,
    /// The handler detected an invalid state and refused the call.
    InternalError = 2,
    /// A result buffer did not fit the session's transmit budget.
    TransmitBudgetExceeded = 3,
}

impl TryFrom<u32> for ReplyOutcome {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0 => Ok(ReplyOutcome::Success),
            1 => Ok(ReplyOutcome::ProtocolError),
            2 => Ok(ReplyOutcome::InternalError),
            3 => Ok(ReplyOutcome::TransmitBudgetExceeded),
            _ => Err(()),
        }
    }
}

// ── Headers and frames ────────────────────────────────────────────────────────

/// Fixed 44-byte header opening every request frame.
///
/// The method name is kept as the raw NUL-padded field; it is validated when
/// the request is dispatched so that a bad name still yields a reply carrying
/// the right request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Opaque id chosen by the peer and echoed in the reply.
    pub request_id: u32,
    /// NUL-padded ASCII method name.
    pub method: [u8; METHOD_NAME_FIELD_SIZE],
    /// Number of parameters the body declares.
    pub param_count: u32,
    /// Length of the parameter body following the header.
    pub body_len: u32,
}

/// Session hello, sent by each side once when a connection opens.
///
/// The peer advertises how many reply bytes it can receive per call; the
/// device answers with the budget it will actually honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHello {
    /// Protocol version; always [`PROTOCOL_VERSION`] for this build.
    pub version: u32,
    /// Receive budget (peer → device) or transmit budget (device → peer).
    pub budget: u32,
}

/// Fixed 20-byte header opening every reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Request id copied from the request.
    pub request_id: u32,
    /// Protocol-level outcome.
    pub outcome: ReplyOutcome,
    /// Domain status code; zero unless the outcome is `Success`.
    pub status: i32,
    /// Number of result buffers in the body.
    pub buffer_count: u32,
    /// Length of the body following the header.
    pub body_len: u32,
}

/// A fully decoded reply, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Request id copied from the request.
    pub request_id: u32,
    /// Protocol-level outcome.
    pub outcome: ReplyOutcome,
    /// Domain status code.
    pub status: i32,
    /// Result buffers in slot order, each trimmed to its reported length.
    pub buffers: Vec<Vec<u8>>,
}
