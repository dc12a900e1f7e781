//! Command framing for the native radio control port.
//!
//! A frame is `<cmd:1><arglen:2 hex><arg:N><checksum:2 hex>\r`, all ASCII.

use thiserror::Error;

/// Every frame (and every device response) ends with a carriage return.
pub const TERMINATOR: u8 = b'\r';

/// Frame decode errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("frame is not terminated")]
    MissingTerminator,
    #[error("frame contains non-ASCII bytes")]
    NotAscii,
    #[error("length field {field:?} does not match argument of {actual} bytes")]
    BadLength { field: String, actual: usize },
    #[error("checksum mismatch: frame says {found}, computed {expected}")]
    BadChecksum { found: String, expected: String },
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: char,
    pub arg: String,
}

/// Two's-complement of the 8-bit truncated byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Build the wire bytes for `cmd` with argument `arg`.
///
/// `arg` must be printable ASCII no longer than 255 bytes; the driver only
/// ever produces decimal digits and single letters.
pub fn encode(cmd: char, arg: &str) -> Vec<u8> {
    debug_assert!(cmd.is_ascii());
    debug_assert!(arg.len() <= 0xFF);

    let mut frame = format!("{}{:02X}{}", cmd, arg.len(), arg).into_bytes();
    let sum = checksum(&frame);
    frame.extend_from_slice(format!("{:02X}", sum).as_bytes());
    frame.push(TERMINATOR);
    frame
}

/// Parse a complete frame back into its command and argument.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let body = bytes
        .strip_suffix(&[TERMINATOR])
        .ok_or(FrameError::MissingTerminator)?;
    if !body.is_ascii() {
        return Err(FrameError::NotAscii);
    }
    // cmd + arglen + checksum
    if body.len() < 5 {
        return Err(FrameError::TooShort(bytes.len()));
    }

    let (payload, sum_field) = body.split_at(body.len() - 2);
    let sum_field = String::from_utf8_lossy(sum_field).into_owned();
    let expected = format!("{:02X}", checksum(payload));
    if sum_field != expected {
        return Err(FrameError::BadChecksum {
            found: sum_field,
            expected,
        });
    }

    let len_field = String::from_utf8_lossy(&payload[1..3]).into_owned();
    let arg = &payload[3..];
    let len = payload[1..3]
        .iter()
        .all(|b| is_upper_hex(*b))
        .then(|| usize::from_str_radix(&len_field, 16).ok())
        .flatten();
    match len {
        Some(len) if len == arg.len() => {}
        _ => {
            return Err(FrameError::BadLength {
                field: len_field,
                actual: arg.len(),
            })
        }
    }

    Ok(Frame {
        cmd: payload[0] as char,
        arg: String::from_utf8_lossy(arg).into_owned(),
    })
}

/// Fields are written with `{:02X}`, so only `0-9A-F` is valid on the wire.
fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}
