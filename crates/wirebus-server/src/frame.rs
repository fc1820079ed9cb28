//! HyBi (RFC6455) frame codec.
//!
//! Stateless transforms between byte buffers and [`Frame`] values. Short
//! input is reported as [`Decoded::Incomplete`] with nothing consumed;
//! the caller keeps the unconsumed remainder and retries after the next
//! read. Only structurally invalid input (unknown opcode, oversized or
//! fragmented control frame) is an error, and it obliges the caller to
//! close the connection.
//!
//! Outgoing frames always set FIN and are never masked (server→client
//! frames are unmasked per spec); incoming frames are unmasked with
//! their XOR key when the mask bit is set.

use crate::errors::FrameError;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Close handshake.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl Opcode {
    /// Decode the low nibble of the first header byte.
    pub fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    /// Wire bits for this opcode.
    pub fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Control frames may not be fragmented or longer than 125 bytes.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// One decoded websocket protocol unit. Ephemeral, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Close status code carried in a close frame payload, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode == Opcode::Close && self.payload.len() >= 2 {
            Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
        } else {
            None
        }
    }
}

/// Result of one decode attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Fewer bytes than the declared frame length; nothing consumed.
    Incomplete,
    /// One complete frame and the bytes it occupied.
    Complete {
        /// The decoded frame, payload unmasked.
        frame: Frame,
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
}

/// Encode a frame: FIN always set, minimal length encoding, unmasked.
pub fn encode(payload: &[u8], opcode: Opcode) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 10);
    out.push(0x80 | opcode.bits());
    if len <= 125 {
        out.push(len as u8);
    } else if len < 65_536 {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// Encode a text frame.
pub fn encode_text(text: &str) -> Vec<u8> {
    encode(text.as_bytes(), Opcode::Text)
}

/// Encode an empty close frame.
pub fn encode_close() -> Vec<u8> {
    encode(&[], Opcode::Close)
}

/// Decode one frame from the front of `buf`.
///
/// Returns [`Decoded::Incomplete`] (consuming nothing) when fewer bytes
/// are available than the declared frame length.
pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete);
    }
    let b1 = buf[0];
    let b2 = buf[1];
    let fin = b1 & 0x80 != 0;
    let opcode = Opcode::from_bits(b1 & 0x0f)?;
    let masked = b2 & 0x80 != 0;

    let mut header_len = 2usize;
    let payload_len: u64 = match b2 & 0x7f {
        126 => {
            header_len = 4;
            if buf.len() < header_len {
                return Ok(Decoded::Incomplete);
            }
            u64::from(u16::from_be_bytes([buf[2], buf[3]]))
        }
        127 => {
            header_len = 10;
            if buf.len() < header_len {
                return Ok(Decoded::Incomplete);
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            u64::from_be_bytes(be)
        }
        small => u64::from(small),
    };

    if opcode.is_control() {
        if payload_len > 125 {
            return Err(FrameError::ControlFrameTooLong(payload_len));
        }
        if !fin {
            return Err(FrameError::FragmentedControlFrame);
        }
    }

    let mask_len = if masked { 4 } else { 0 };
    let full_len = payload_len
        .checked_add(header_len as u64 + mask_len as u64)
        .ok_or(FrameError::PayloadTooLong(payload_len))?;
    if (buf.len() as u64) < full_len {
        return Ok(Decoded::Incomplete);
    }
    let full_len = full_len as usize;
    let payload_start = header_len + mask_len;

    let mut payload = buf[payload_start..full_len].to_vec();
    if masked {
        let key = &buf[header_len..header_len + 4];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Decoded::Complete {
        frame: Frame {
            fin,
            opcode,
            payload,
        },
        consumed: full_len,
    })
}

/// Drain every complete frame from the front of `buf`.
///
/// Consumed bytes are removed from `buf`; a trailing partial frame is
/// left in place for the next read. Decoding stops after a close frame:
/// any bytes behind it are dropped, and the returned flag tells the
/// caller the peer initiated the close handshake.
pub fn drain(buf: &mut bytes::BytesMut) -> Result<(Vec<Frame>, bool), FrameError> {
    let mut frames = Vec::new();
    loop {
        match decode(buf.as_ref())? {
            Decoded::Incomplete => return Ok((frames, false)),
            Decoded::Complete { frame, consumed } => {
                let _ = buf.split_to(consumed);
                let closing = frame.opcode == Opcode::Close;
                frames.push(frame);
                if closing {
                    buf.clear();
                    return Ok((frames, true));
                }
            }
        }
    }
}
