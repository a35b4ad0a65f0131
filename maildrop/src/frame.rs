//! Wire format for message framing.
//!
//! Frame format: `<hex-length><'|'><payload>`
//!
//! - **hex-length**: payload byte count in lowercase hexadecimal digits
//!   (no sign, no required leading zeros)
//! - **delimiter**: the single byte `|` (0x7C), which can never appear
//!   inside a hex length
//! - **payload**: exactly `hex-length` bytes of arbitrary binary content,
//!   delimiter byte included
//!
//! Frames are self-delimiting: each frame is defined entirely by its own
//! length prefix, so a single TCP stream carries any number of them
//! back-to-back. Decoding is incremental and tolerates arbitrary chunk
//! boundaries.

use thiserror::Error;

/// Byte separating the hex length from the payload.
pub const DELIMITER: u8 = b'|';

/// Maximum payload size (1MB).
///
/// Frames larger than this are rejected to prevent memory exhaustion.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Maximum number of hex digits in a length prefix.
///
/// `MAX_PAYLOAD_SIZE` fits in 6 digits; the budget leaves headroom for
/// encoders that emit leading zeros.
pub const MAX_LENGTH_DIGITS: usize = 8;

/// Maximum frames extracted from the buffer per [`FrameDecoder::feed`].
///
/// Bounds the drain loop so a stream of zero-length frames cannot pin the
/// decoder; exceeding it is a protocol error, not a silent drop.
pub const MAX_FRAMES_PER_FEED: usize = 4096;

/// Framing errors. All of them are fatal to the connection that produced
/// the bytes: a corrupted length prefix cannot be re-synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The length prefix was not parseable as hexadecimal digits.
    #[error("unparseable frame length: {digits:?}")]
    InvalidLength {
        /// The bytes found where hex digits were expected.
        digits: String,
    },

    /// No delimiter appeared within the length-digit budget.
    #[error("no delimiter within {MAX_LENGTH_DIGITS} length digits")]
    DelimiterMissing,

    /// The payload length exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge {
        /// The declared or actual payload size.
        size: usize,
    },

    /// More than [`MAX_FRAMES_PER_FEED`] frames arrived in one feed.
    #[error("more than {MAX_FRAMES_PER_FEED} frames in one buffer update")]
    FrameBudgetExhausted,
}

/// Encode a payload into a self-delimiting frame.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload exceeds [`MAX_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```
/// use maildrop::frame::encode_frame;
///
/// let frame = encode_frame(b"hi").expect("encode");
/// assert_eq!(frame, b"2|hi");
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
        });
    }

    let prefix = format!("{:x}", payload.len());
    let mut frame = Vec::with_capacity(prefix.len() + 1 + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.push(DELIMITER);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental frame decoder holding one connection's unconsumed bytes.
///
/// Bytes are consumed only when a complete frame is available; partial
/// frames persist across [`feed`](Self::feed) calls. A decoder is scoped
/// to a single connection and must be discarded with it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a received chunk and extract every frame it completes.
    ///
    /// Returns the completed payloads in stream order; an empty vec means
    /// more data is needed (not an error condition).
    ///
    /// # Errors
    ///
    /// Any [`FrameError`] means the stream is corrupt and the connection
    /// must be torn down; the decoder state is unspecified afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(payload) = self.try_extract()? {
            if frames.len() >= MAX_FRAMES_PER_FEED {
                return Err(FrameError::FrameBudgetExhausted);
            }
            frames.push(payload);
        }
        Ok(frames)
    }

    /// Try to extract one complete frame from the front of the buffer.
    ///
    /// Returns `Ok(None)` when the delimiter or the full payload has not
    /// arrived yet; the buffer is left untouched in that case.
    fn try_extract(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let search_end = self.buffer.len().min(MAX_LENGTH_DIGITS + 1);
        let delimiter = self.buffer[..search_end]
            .iter()
            .position(|&b| b == DELIMITER);

        let Some(delimiter) = delimiter else {
            if self.buffer.len() > MAX_LENGTH_DIGITS {
                return Err(FrameError::DelimiterMissing);
            }
            return Ok(None); // Need more data for the length prefix
        };

        let digits = &self.buffer[..delimiter];
        let length = std::str::from_utf8(digits)
            .ok()
            .and_then(|text| usize::from_str_radix(text, 16).ok())
            .ok_or_else(|| FrameError::InvalidLength {
                digits: String::from_utf8_lossy(digits).into_owned(),
            })?;

        if length > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge { size: length });
        }

        let frame_end = delimiter + 1 + length;
        if self.buffer.len() < frame_end {
            return Ok(None); // Need more data for the payload
        }

        let payload = self.buffer[delimiter + 1..frame_end].to_vec();
        self.buffer.drain(..frame_end);
        Ok(Some(payload))
    }
}
