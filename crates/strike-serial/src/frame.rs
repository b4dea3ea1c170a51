//! Byte-stream framing for the controller protocol.
//!
//! [`FrameParser`] accumulates raw bytes from the serial line and extracts
//! complete frames. Two frame shapes exist:
//!
//! - ack frames: marker `'O'` + 1 status byte, consumed as 2 bytes;
//! - input frames: marker `'I'` + 2-byte group id + 4-hex-digit bitmask,
//!   consumed as **5** bytes, leaving the last 2 payload bytes in place for
//!   the next scan.
//!
//! The 2-byte vs 5-byte consume asymmetry is a fixed quirk of the
//! controller's wire format and is preserved exactly; the leftover bytes are
//! marker-free and fall out as noise on the next scan. Any bytes preceding
//! the first recognised marker are discarded, which is the only recovery
//! mechanism for framing errors.

use strike_types::InputEvent;
use tracing::warn;

/// Marker byte of an output-acknowledgement frame.
pub const ACK_MARKER: u8 = b'O';
/// Marker byte of an input-event frame.
pub const INPUT_MARKER: u8 = b'I';
/// Status byte of a successful ack.
pub const ACK_SUCCESS: u8 = b'1';

/// Group id of poll responses (answers to the `I` read command). These
/// update the link's latest input value instead of being re-emitted as
/// events.
pub const POLL_GROUP: &str = "21";

const ACK_FRAME_LEN: usize = 2;
const INPUT_FRAME_LEN: usize = 7;
/// Input frames are 7 bytes wide but only 5 are consumed.
const INPUT_FRAME_CONSUMED: usize = 5;

/// One complete frame extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Acknowledgement of the last output command.
    Ack { status: u8 },
    /// A device input event: raw group id and hex bitmask, both ASCII.
    Input { group: String, mask: String },
}

/// Incremental frame extractor over a growing byte buffer.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and extract every complete frame now available.
    ///
    /// Bounded: each iteration either completes a frame, discards leading
    /// noise up to the next marker, or stops to await more data.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            // Earliest marker of either kind wins.
            let marker = self
                .buf
                .iter()
                .position(|&b| b == ACK_MARKER || b == INPUT_MARKER);

            let Some(offset) = marker else {
                // No marker anywhere: everything buffered is noise.
                self.buf.clear();
                break;
            };

            if offset > 0 {
                warn!(discarded = offset, "discarding bytes before frame marker");
                self.buf.drain(..offset);
            }

            match self.buf[0] {
                ACK_MARKER => {
                    if self.buf.len() < ACK_FRAME_LEN {
                        break; // frame not yet complete
                    }
                    frames.push(Frame::Ack { status: self.buf[1] });
                    self.buf.drain(..ACK_FRAME_LEN);
                }
                _ => {
                    if self.buf.len() < INPUT_FRAME_LEN {
                        break; // frame not yet complete
                    }
                    let group = String::from_utf8_lossy(&self.buf[1..3]).into_owned();
                    let mask = String::from_utf8_lossy(&self.buf[3..7]).into_owned();
                    frames.push(Frame::Input { group, mask });
                    self.buf.drain(..INPUT_FRAME_CONSUMED);
                }
            }
        }

        frames
    }

    /// Bytes currently buffered awaiting a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Decode a raw input frame into an [`InputEvent`].
///
/// The bitmask is parsed as 16-bit hex; one leading zero is stripped from
/// the group id. Returns `None` for a malformed bitmask or an empty code
/// after stripping — malformed frames are logged by the caller and ignored.
pub fn decode_input_event(group: &str, mask: &str) -> Option<InputEvent> {
    let value = u16::from_str_radix(mask, 16).ok()?;
    let code = group.strip_prefix('0').unwrap_or(group);
    if code.is_empty() {
        return None;
    }
    Some(InputEvent {
        code: code.to_string(),
        value,
    })
}
