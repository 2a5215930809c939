use bytes::{Buf, BufMut, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// A decoded frame. Control-frame payloads are always empty: the decoder
/// drains them off the wire but does not hand them back (see `parse`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated")]
    Truncated,
    #[error("reserved bits set or unmasked client frame")]
    ProtocolError,
    #[error("fragmented or oversized frame unsupported")]
    Unsupported,
}

/// Used internally by `parse` to distinguish "need more bytes" (the buffer
/// just hasn't filled up yet) from an actual protocol violation.
enum DecodeError {
    Incomplete,
    Frame(FrameError),
}

impl From<FrameError> for DecodeError {
    fn from(e: FrameError) -> Self {
        DecodeError::Frame(e)
    }
}

/// Parses one frame out of `data`, returning the frame and the number of
/// bytes it consumed. `Incomplete` (folded into the caller's "keep
/// buffering" path) means `data` doesn't yet hold a whole frame: callers
/// should read more bytes and retry rather than treat it as an error.
#[cfg(test)]
fn parse(data: &[u8]) -> std::result::Result<(Frame, usize), FrameError> {
    match try_parse(data) {
        Ok(result) => Ok(result),
        Err(DecodeError::Incomplete) => Err(FrameError::Truncated),
        Err(DecodeError::Frame(e)) => Err(e),
    }
}

/// Like `parse`, but reports "not enough bytes yet" distinctly from a
/// genuine protocol error, so the caller's buffering loop can tell apart
/// "keep reading" from "fail the session".
pub fn try_parse_buffered(data: &[u8]) -> Option<std::result::Result<(Frame, usize), FrameError>> {
    match try_parse(data) {
        Ok(result) => Some(Ok(result)),
        Err(DecodeError::Incomplete) => None,
        Err(DecodeError::Frame(e)) => Some(Err(e)),
    }
}

fn try_parse(data: &[u8]) -> std::result::Result<(Frame, usize), DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::Incomplete);
    }

    let mut buf = data;
    let start_len = buf.len();

    let first_byte = buf.get_u8();
    let fin = (first_byte & 0x80) != 0;
    let rsv = first_byte & 0x70;
    let opcode = OpCode::from_byte(first_byte).ok_or(FrameError::ProtocolError)?;

    if rsv != 0 {
        return Err(FrameError::ProtocolError.into());
    }
    if !fin {
        return Err(FrameError::Unsupported.into());
    }
    if opcode == OpCode::Continuation {
        return Err(FrameError::Unsupported.into());
    }

    let second_byte = buf.get_u8();
    let masked = (second_byte & 0x80) != 0;
    if !masked {
        return Err(FrameError::ProtocolError.into());
    }

    let mut payload_length = (second_byte & 0x7F) as u64;
    if payload_length == 126 {
        if buf.remaining() < 2 {
            return Err(DecodeError::Incomplete);
        }
        payload_length = buf.get_u16() as u64;
    } else if payload_length == 127 {
        if buf.remaining() < 8 {
            return Err(DecodeError::Incomplete);
        }
        payload_length = buf.get_u64();
        if payload_length & (1 << 63) != 0 {
            return Err(FrameError::Unsupported.into());
        }
    }

    if buf.remaining() < 4 {
        return Err(DecodeError::Incomplete);
    }
    let mut mask_key = [0u8; 4];
    buf.copy_to_slice(&mut mask_key);

    if buf.remaining() < payload_length as usize {
        return Err(DecodeError::Incomplete);
    }

    let mut payload = vec![0u8; payload_length as usize];
    buf.copy_to_slice(&mut payload);
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }

    let consumed = start_len - buf.remaining();

    // Control-frame payloads are don't-care for this bridge: the bytes are
    // drained from the wire above (so framing stays in sync) but discarded.
    let payload = if opcode.is_control() { Vec::new() } else { payload };

    Ok((Frame { opcode, payload }, consumed))
}

/// Encodes a server->client data frame. Every data frame is tagged `Text`
/// regardless of how the payload originated: there is no
/// `encode_data(opcode, ...)` entry point because the tagging isn't a
/// choice the caller makes.
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    write_frame(OpCode::Text, payload)
}

/// Encodes a zero-or-more-byte control frame (`Close` or `Pong`).
pub fn encode_control(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    debug_assert!(opcode.is_control());
    write_frame(opcode, payload)
}

fn write_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(payload.len() + 10);

    frame.put_u8(0x80 | (opcode as u8));

    let len = payload.len();
    if len < 126 {
        frame.put_u8(len as u8);
    } else if len <= 0xFFFF {
        frame.put_u8(126);
        frame.put_u16(len as u16);
    } else {
        frame.put_u8(127);
        frame.put_u64(len as u64);
    }

    if !payload.is_empty() {
        frame.extend_from_slice(payload);
    }

    frame.to_vec()
}
