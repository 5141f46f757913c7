//! Binary codec for Tether request, reply, and session-hello frames.
//!
//! Wire formats (all integers little-endian):
//! ```text
//! hello   : [magic:4 "TTHR"][version:4][budget:4]
//! request : [request_id:4][method:32][param_count:4][body_len:4][params...]
//! param   : [tag:1][value:1|4|8]            scalars (S8, S32, S64)
//!           [tag:1][len:4][bytes:len]       buffers
//! reply   : [request_id:4][outcome:4][status:4][buffer_count:4][body_len:4]
//!           then per buffer [len:4][bytes:len]
//! ```
//!
//! # Bounds checking
//!
//! Every read goes through [`WireReader::take`], the single choke point that
//! compares the requested length against what is left of the input.  A short
//! or lying frame turns into a [`ProtocolError`], never into an out-of-bounds
//! access.

use thiserror::Error;

use crate::protocol::messages::{
    ParamTag, Reply, ReplyHeader, ReplyOutcome, RequestHeader, SessionHello, HELLO_MAGIC,
    HELLO_SIZE, MAX_METHOD_NAME_LEN, METHOD_NAME_FIELD_SIZE, PROTOCOL_VERSION, REPLY_HEADER_SIZE,
    REQUEST_HEADER_SIZE, RESULT_BUFFER_PREFIX_SIZE,
};

/// Errors that can occur while decoding or encoding protocol frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the field being read.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The method name is empty, too long, unterminated, or not printable ASCII.
    #[error("invalid method name: {0:?}")]
    InvalidMethodName(String),

    /// The method name is well-formed but not in the dispatch table.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// A parameter tag byte is not a recognized value.
    #[error("unknown parameter tag: 0x{0:02X}")]
    UnknownParameterTag(u8),

    /// The handler asked for a different parameter type than the peer sent.
    #[error("parameter {index}: handler expects {expected}, peer sent {found}")]
    ParameterTypeMismatch {
        index: u32,
        expected: ParamTag,
        found: ParamTag,
    },

    /// The handler asked for more parameters than the request declares.
    #[error("parameter {index} requested but the request declares only {declared}")]
    MissingParameter { index: u32, declared: u32 },

    /// The handler finished reading with parameters left over.
    #[error("request declares {declared} parameters but the handler consumed {consumed}")]
    UnconsumedParameters { declared: u32, consumed: u32 },

    /// Bytes remain in the body after the last declared parameter.
    #[error("{0} trailing bytes after the last parameter")]
    TrailingBytes(usize),

    /// A buffer parameter claims more bytes than remain in the body.
    #[error("buffer parameter claims {claimed} bytes but only {available} remain")]
    BufferOverrun { claimed: usize, available: usize },

    /// The body length in a header does not match the bytes supplied.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The request body exceeds the server's configured limit.
    #[error("request body of {len} bytes exceeds the {limit}-byte limit")]
    RequestTooLarge { len: usize, limit: usize },

    /// The session hello does not start with [`HELLO_MAGIC`].
    #[error("bad hello magic: {0:02X?}")]
    BadMagic([u8; 4]),

    /// The session hello advertises a protocol version this build cannot speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// The reply outcome field is not a recognized value.
    #[error("unknown reply outcome: {0}")]
    UnknownOutcome(u32),
}

// ── Bounded reader ────────────────────────────────────────────────────────────

/// Cursor over an untrusted byte region.
///
/// The reader never reads past the end of its slice: every accessor is built
/// on [`WireReader::take`], which fails with
/// [`ProtocolError::InsufficientData`] instead.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Offset of the next byte to be read.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consumes exactly `n` bytes and returns them as a view into the input.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if fewer than `n` bytes remain;
    /// the cursor does not move in that case.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.remaining();
        let end = self.pos.saturating_add(n);
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(ProtocolError::InsufficientData {
                needed: n,
                available,
            })?;
        self.pos = end;
        Ok(slice)
    }

    /// Consumes `N` bytes into a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }
}

// ── Scalar parameters ─────────────────────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// A scalar type that can travel as a request parameter.
///
/// Implemented for exactly the three widths the protocol defines: `i8`,
/// `i32`, and `i64`.  The trait is sealed so the set of wire types stays
/// closed.
pub trait WireScalar: Copy + sealed::Sealed {
    /// Tag that precedes values of this type on the wire.
    const TAG: ParamTag;

    /// Reads one value (without its tag).
    fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    /// Appends one value (without its tag).
    fn write(self, out: &mut Vec<u8>);
}

impl WireScalar for i8 {
    const TAG: ParamTag = ParamTag::S8;

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        reader.read_i8()
    }

    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireScalar for i32 {
    const TAG: ParamTag = ParamTag::S32;

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        reader.read_i32()
    }

    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireScalar for i64 {
    const TAG: ParamTag = ParamTag::S64;

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        reader.read_i64()
    }

    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

// ── Parameter stream ──────────────────────────────────────────────────────────

/// Sequential, type-checked reader over a request body.
///
/// Parameters must be read in declaration order with the declared types.
/// [`ParamReader::finish`] verifies that everything the peer sent was
/// consumed.
#[derive(Debug, Clone)]
pub struct ParamReader<'a> {
    reader: WireReader<'a>,
    declared: u32,
    consumed: u32,
}

impl<'a> ParamReader<'a> {
    /// Creates a reader over `body`, which declares `declared` parameters.
    pub fn new(body: &'a [u8], declared: u32) -> Self {
        Self {
            reader: WireReader::new(body),
            declared,
            consumed: 0,
        }
    }

    /// Number of parameters the request declares.
    pub fn declared(&self) -> u32 {
        self.declared
    }

    /// Number of parameters read so far.
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Reads the next parameter as a scalar of type `T`.
    pub fn read_scalar<T: WireScalar>(&mut self) -> Result<T, ProtocolError> {
        self.expect_tag(T::TAG)?;
        let value = T::read(&mut self.reader)?;
        self.consumed += 1;
        Ok(value)
    }

    /// Reads the next parameter as a buffer and returns a view into the body.
    pub fn read_buffer(&mut self) -> Result<&'a [u8], ProtocolError> {
        self.expect_tag(ParamTag::Buffer)?;
        let claimed = self.reader.read_u32()? as usize;
        let available = self.reader.remaining();
        if claimed > available {
            return Err(ProtocolError::BufferOverrun { claimed, available });
        }
        let bytes = self.reader.take(claimed)?;
        self.consumed += 1;
        Ok(bytes)
    }

    /// Verifies that every declared parameter was read and nothing trails them.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.consumed != self.declared {
            return Err(ProtocolError::UnconsumedParameters {
                declared: self.declared,
                consumed: self.consumed,
            });
        }
        match self.reader.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }

    fn expect_tag(&mut self, expected: ParamTag) -> Result<(), ProtocolError> {
        if self.consumed >= self.declared {
            return Err(ProtocolError::MissingParameter {
                index: self.consumed,
                declared: self.declared,
            });
        }
        let raw = self.reader.read_u8()?;
        let found = ParamTag::try_from(raw).map_err(|()| ProtocolError::UnknownParameterTag(raw))?;
        if found != expected {
            return Err(ProtocolError::ParameterTypeMismatch {
                index: self.consumed,
                expected,
                found,
            });
        }
        Ok(())
    }
}

// ── Method names ──────────────────────────────────────────────────────────────

/// Returns `true` if `name` can be carried in the request method field.
pub fn is_valid_method_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_METHOD_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_graphic())
}

/// Packs a method name into its NUL-padded 32-byte field.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidMethodName`] if the name is empty, longer
/// than 31 bytes, or contains anything but printable ASCII.
pub fn encode_method_name(name: &str) -> Result<[u8; METHOD_NAME_FIELD_SIZE], ProtocolError> {
    if !is_valid_method_name(name) {
        return Err(ProtocolError::InvalidMethodName(name.to_string()));
    }
    let mut field = [0u8; METHOD_NAME_FIELD_SIZE];
    for (slot, byte) in field.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    Ok(field)
}

/// Extracts the method name from its NUL-padded field.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidMethodName`] if the field has no NUL
/// terminator or the name before it is not valid.
pub fn decode_method_name(field: &[u8; METHOD_NAME_FIELD_SIZE]) -> Result<&str, ProtocolError> {
    let invalid = |bytes: &[u8]| {
        ProtocolError::InvalidMethodName(String::from_utf8_lossy(bytes).into_owned())
    };

    let len = field.iter().position(|&b| b == 0).ok_or_else(|| invalid(field))?;
    let (name, _) = field.split_at(len);
    std::str::from_utf8(name)
        .ok()
        .filter(|s| is_valid_method_name(s))
        .ok_or_else(|| invalid(name))
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Encodes a request header into its fixed 44-byte form.
pub fn encode_request_header(header: &RequestHeader) -> [u8; REQUEST_HEADER_SIZE] {
    fill_fixed([
        &header.request_id.to_le_bytes()[..],
        &header.method[..],
        &header.param_count.to_le_bytes()[..],
        &header.body_len.to_le_bytes()[..],
    ])
}

/// Decodes the fixed 44-byte request header from the start of `bytes`.
///
/// The method field is not validated here; see [`decode_method_name`].
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if `bytes` is shorter than the header.
pub fn decode_request_header(bytes: &[u8]) -> Result<RequestHeader, ProtocolError> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: REQUEST_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let mut reader = WireReader::new(bytes);
    Ok(RequestHeader {
        request_id: reader.read_u32()?,
        method: reader.read_array()?,
        param_count: reader.read_u32()?,
        body_len: reader.read_u32()?,
    })
}

/// Builds request frames the way a peer does.
///
/// Used by the peer side of the protocol, by integration tests, and by
/// benchmarks.
///
/// # Examples
///
/// ```rust
/// use tether_core::protocol::codec::{decode_request_header, RequestBuilder};
///
/// let frame = RequestBuilder::new(7, "FSFILE_Read")
///     .s32(3)
///     .s64(0)
///     .s32(512)
///     .encode()
///     .unwrap();
/// let header = decode_request_header(&frame).unwrap();
/// assert_eq!(header.request_id, 7);
/// assert_eq!(header.param_count, 3);
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request_id: u32,
    method: String,
    param_count: u32,
    body: Vec<u8>,
}

impl RequestBuilder {
    /// Starts a request for `method` with no parameters.
    pub fn new(request_id: u32, method: impl Into<String>) -> Self {
        Self {
            request_id,
            method: method.into(),
            param_count: 0,
            body: Vec::new(),
        }
    }

    /// Appends a scalar parameter of any wire width.
    pub fn scalar<T: WireScalar>(mut self, value: T) -> Self {
        self.body.push(T::TAG as u8);
        value.write(&mut self.body);
        self.param_count += 1;
        self
    }

    /// Appends a signed 8-bit parameter.
    pub fn s8(self, value: i8) -> Self {
        self.scalar(value)
    }

    /// Appends a signed 32-bit parameter.
    pub fn s32(self, value: i32) -> Self {
        self.scalar(value)
    }

    /// Appends a signed 64-bit parameter.
    pub fn s64(self, value: i64) -> Self {
        self.scalar(value)
    }

    /// Appends a length-prefixed buffer parameter.
    pub fn buffer(mut self, data: &[u8]) -> Self {
        self.body.push(ParamTag::Buffer as u8);
        self.body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.body.extend_from_slice(data);
        self.param_count += 1;
        self
    }

    /// Encodes the header and body into one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMethodName`] if the method name cannot
    /// be carried on the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = RequestHeader {
            request_id: self.request_id,
            method: encode_method_name(&self.method)?,
            param_count: self.param_count,
            body_len: self.body.len() as u32,
        };
        let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + self.body.len());
        frame.extend_from_slice(&encode_request_header(&header));
        frame.extend_from_slice(&self.body);
        Ok(frame)
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Encodes a reply frame.
///
/// Each entry of `buffers` is written with its own length prefix, in slot
/// order.  Callers pass buffers already trimmed to their reported length.
pub fn encode_reply(
    request_id: u32,
    outcome: ReplyOutcome,
    status: i32,
    buffers: &[&[u8]],
) -> Vec<u8> {
    let body_len: usize = buffers
        .iter()
        .map(|b| RESULT_BUFFER_PREFIX_SIZE + b.len())
        .sum();

    let mut frame = Vec::with_capacity(REPLY_HEADER_SIZE + body_len);
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&(outcome as u32).to_le_bytes());
    frame.extend_from_slice(&status.to_le_bytes());
    frame.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    for buffer in buffers {
        frame.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
        frame.extend_from_slice(buffer);
    }
    frame
}

/// Decodes the fixed 20-byte reply header from the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] for a short slice and
/// [`ProtocolError::UnknownOutcome`] for an unrecognized outcome value.
pub fn decode_reply_header(bytes: &[u8]) -> Result<ReplyHeader, ProtocolError> {
    if bytes.len() < REPLY_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: REPLY_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let mut reader = WireReader::new(bytes);
    let request_id = reader.read_u32()?;
    let raw_outcome = reader.read_u32()?;
    let outcome = ReplyOutcome::try_from(raw_outcome)
        .map_err(|()| ProtocolError::UnknownOutcome(raw_outcome))?;
    Ok(ReplyHeader {
        request_id,
        outcome,
        status: reader.read_i32()?,
        buffer_count: reader.read_u32()?,
        body_len: reader.read_u32()?,
    })
}

/// Decodes one reply from the beginning of `bytes`.
///
/// Returns the reply and the number of bytes consumed (header + body).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is truncated, its buffer lengths
/// disagree with its body length, or its outcome is unknown.
pub fn decode_reply(bytes: &[u8]) -> Result<(Reply, usize), ProtocolError> {
    let header = decode_reply_header(bytes)?;
    let body_len = header.body_len as usize;
    let total = REPLY_HEADER_SIZE + body_len;
    let body = bytes
        .get(REPLY_HEADER_SIZE..total)
        .ok_or(ProtocolError::PayloadLengthMismatch {
            declared: body_len,
            available: bytes.len() - REPLY_HEADER_SIZE,
        })?;

    let mut reader = WireReader::new(body);
    let mut buffers = Vec::new();
    for _ in 0..header.buffer_count {
        let len = reader.read_u32()? as usize;
        buffers.push(reader.take(len)?.to_vec());
    }
    if reader.remaining() != 0 {
        return Err(ProtocolError::TrailingBytes(reader.remaining()));
    }

    Ok((
        Reply {
            request_id: header.request_id,
            outcome: header.outcome,
            status: header.status,
            buffers,
        },
        total,
    ))
}

// ── Session hello ─────────────────────────────────────────────────────────────

/// Encodes a session hello.
pub fn encode_hello(hello: &SessionHello) -> [u8; HELLO_SIZE] {
    fill_fixed([
        &HELLO_MAGIC[..],
        &hello.version.to_le_bytes()[..],
        &hello.budget.to_le_bytes()[..],
    ])
}

/// Decodes and validates a session hello.
///
/// # Errors
///
/// Returns [`ProtocolError::BadMagic`] or [`ProtocolError::UnsupportedVersion`]
/// when the other side is not speaking this protocol.
pub fn decode_hello(bytes: &[u8]) -> Result<SessionHello, ProtocolError> {
    let mut reader = WireReader::new(bytes);
    let magic: [u8; 4] = reader.read_array()?;
    if magic != HELLO_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let version = reader.read_u32()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(SessionHello {
        version,
        budget: reader.read_u32()?,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Concatenates `parts` into a fixed-size array whose size they exactly fill.
fn fill_fixed<const N: usize, const P: usize>(parts: [&[u8]; P]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut slots = out.iter_mut();
    for byte in parts.iter().flat_map(|p| p.iter()) {
        if let Some(slot) = slots.next() {
            *slot = *byte;
        }
    }
    debug_assert!(slots.next().is_none(), "fixed frame under-filled");
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_reader_take_past_end_fails_without_moving() {
        // Arrange
        let data = [1u8, 2, 3];
        let mut reader = WireReader::new(&data);

        // Act
        let result = reader.take(4);

        // Assert
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: 4,
                available: 3,
            })
        );
        assert_eq!(reader.position(), 0, "a failed read must not advance");
    }

    #[test]
    fn test_wire_reader_reads_little_endian() {
        let data = [0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut reader = WireReader::new(&data);

        assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.read_i8().unwrap(), -1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_wire_reader_take_huge_length_does_not_overflow() {
        let data = [0u8; 8];
        let mut reader = WireReader::new(&data);
        reader.take(4).unwrap();

        let result = reader.take(usize::MAX);

        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_param_reader_decodes_scalars_and_buffer_in_order() {
        // Arrange – 4-byte, 8-byte, then a trailing buffer
        let frame = RequestBuilder::new(1, "Test")
            .s32(-7)
            .s64(0x0102_0304_0506_0708)
            .buffer(b"hello")
            .encode()
            .unwrap();
        let header = decode_request_header(&frame).unwrap();
        let body = &frame[REQUEST_HEADER_SIZE..];
        let mut params = ParamReader::new(body, header.param_count);

        // Act
        let a: i32 = params.read_scalar().unwrap();
        let b: i64 = params.read_scalar().unwrap();
        let c = params.read_buffer().unwrap();

        // Assert
        assert_eq!(a, -7);
        assert_eq!(b, 0x0102_0304_0506_0708);
        assert_eq!(c, b"hello");
        assert_eq!(params.finish(), Ok(()));
    }

    #[test]
    fn test_param_reader_rejects_wrong_width() {
        let frame = RequestBuilder::new(1, "Test").s32(5).encode().unwrap();
        let mut params = ParamReader::new(&frame[REQUEST_HEADER_SIZE..], 1);

        let result = params.read_scalar::<i64>();

        assert_eq!(
            result,
            Err(ProtocolError::ParameterTypeMismatch {
                index: 0,
                expected: ParamTag::S64,
                found: ParamTag::S32,
            })
        );
    }

    #[test]
    fn test_param_reader_rejects_buffer_length_beyond_body() {
        // Arrange – tag + length claiming 100 bytes, only 3 present
        let mut body = vec![ParamTag::Buffer as u8];
        body.extend_from_slice(&100u32.to_le_bytes());
        body.extend_from_slice(&[1, 2, 3]);
        let mut params = ParamReader::new(&body, 1);

        // Act
        let result = params.read_buffer();

        // Assert
        assert_eq!(
            result,
            Err(ProtocolError::BufferOverrun {
                claimed: 100,
                available: 3,
            })
        );
    }

    #[test]
    fn test_param_reader_missing_parameter_is_reported() {
        let frame = RequestBuilder::new(1, "Test").s32(1).encode().unwrap();
        let mut params = ParamReader::new(&frame[REQUEST_HEADER_SIZE..], 1);
        params.read_scalar::<i32>().unwrap();

        let result = params.read_scalar::<i32>();

        assert_eq!(
            result,
            Err(ProtocolError::MissingParameter {
                index: 1,
                declared: 1,
            })
        );
    }

    #[test]
    fn test_param_reader_finish_detects_unconsumed_parameter() {
        let frame = RequestBuilder::new(1, "Test").s8(1).s8(2).encode().unwrap();
        let mut params = ParamReader::new(&frame[REQUEST_HEADER_SIZE..], 2);
        params.read_scalar::<i8>().unwrap();

        assert_eq!(
            params.finish(),
            Err(ProtocolError::UnconsumedParameters {
                declared: 2,
                consumed: 1,
            })
        );
    }

    #[test]
    fn test_param_reader_finish_detects_trailing_bytes() {
        // Arrange – one declared S8 followed by two stray bytes
        let body = [ParamTag::S8 as u8, 9, 0xAA, 0xBB];
        let mut params = ParamReader::new(&body, 1);
        params.read_scalar::<i8>().unwrap();

        // Act / Assert
        assert_eq!(params.finish(), Err(ProtocolError::TrailingBytes(2)));
    }

    #[test]
    fn test_param_reader_unknown_tag() {
        let body = [0x7F, 0];
        let mut params = ParamReader::new(&body, 1);

        assert_eq!(
            params.read_scalar::<i8>(),
            Err(ProtocolError::UnknownParameterTag(0x7F))
        );
    }

    #[test]
    fn test_method_name_accepts_31_bytes_and_rejects_32() {
        let ok = "A".repeat(MAX_METHOD_NAME_LEN);
        let too_long = "A".repeat(MAX_METHOD_NAME_LEN + 1);

        assert!(encode_method_name(&ok).is_ok());
        assert!(matches!(
            encode_method_name(&too_long),
            Err(ProtocolError::InvalidMethodName(_))
        ));
    }

    #[test]
    fn test_method_name_rejects_empty_and_non_ascii() {
        assert!(!is_valid_method_name(""));
        assert!(!is_valid_method_name("FS Read"));
        assert!(!is_valid_method_name("Fs\u{e9}"));
        assert!(is_valid_method_name("#ArticController"));
    }

    #[test]
    fn test_decode_method_name_requires_terminator() {
        let field = [b'A'; METHOD_NAME_FIELD_SIZE];

        assert!(matches!(
            decode_method_name(&field),
            Err(ProtocolError::InvalidMethodName(_))
        ));
    }

    #[test]
    fn test_decode_method_name_is_case_sensitive_exact() {
        let field = encode_method_name("FSFILE_Read").unwrap();

        assert_eq!(decode_method_name(&field).unwrap(), "FSFILE_Read");
        assert_ne!(decode_method_name(&field).unwrap(), "fsfile_read");
    }

    #[test]
    fn test_decode_request_header_short_input() {
        let result = decode_request_header(&[0u8; 10]);

        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: REQUEST_HEADER_SIZE,
                available: 10
            })
        );
    }

    #[test]
    fn test_encode_reply_layout() {
        // Arrange
        let payload: &[u8] = &[0xAA, 0xBB];

        // Act
        let frame = encode_reply(0x11, ReplyOutcome::Success, -5, &[payload]);

        // Assert – header fields little-endian, then [len][bytes]
        assert_eq!(frame.len(), REPLY_HEADER_SIZE + 4 + 2);
        assert_eq!(&frame[0..4], &0x11u32.to_le_bytes());
        assert_eq!(&frame[4..8], &0u32.to_le_bytes());
        assert_eq!(&frame[8..12], &(-5i32).to_le_bytes());
        assert_eq!(&frame[12..16], &1u32.to_le_bytes());
        assert_eq!(&frame[16..20], &6u32.to_le_bytes());
        assert_eq!(&frame[20..24], &2u32.to_le_bytes());
        assert_eq!(&frame[24..], payload);
    }

    #[test]
    fn test_decode_reply_truncated_body() {
        let mut frame = encode_reply(1, ReplyOutcome::Success, 0, &[&[1, 2, 3, 4]]);
        frame.truncate(frame.len() - 1);

        assert!(matches!(
            decode_reply(&frame),
            Err(ProtocolError::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_reply_unknown_outcome() {
        let mut frame = encode_reply(1, ReplyOutcome::Success, 0, &[]);
        frame[4..8].copy_from_slice(&9u32.to_le_bytes());

        assert_eq!(decode_reply(&frame), Err(ProtocolError::UnknownOutcome(9)));
    }

    #[test]
    fn test_hello_rejects_bad_magic() {
        let mut bytes = encode_hello(&SessionHello {
            version: PROTOCOL_VERSION,
            budget: 64,
        });
        bytes[0] = b'X';

        assert!(matches!(decode_hello(&bytes), Err(ProtocolError::BadMagic(_))));
    }

    #[test]
    fn test_hello_rejects_other_version() {
        let bytes = encode_hello(&SessionHello {
            version: PROTOCOL_VERSION + 1,
            budget: 64,
        });

        assert_eq!(
            decode_hello(&bytes),
            Err(ProtocolError::UnsupportedVersion(PROTOCOL_VERSION + 1))
        );
    }

    #[test]
    fn test_hello_carries_budget() {
        let bytes = encode_hello(&SessionHello {
            version: PROTOCOL_VERSION,
            budget: 0x8000,
        });

        let hello = decode_hello(&bytes).unwrap();

        assert_eq!(hello.budget, 0x8000);
        assert_eq!(&bytes[0..4], b"TTHR");
    }
}
