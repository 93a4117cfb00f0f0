use bytes::Bytes;
use std::str::{from_utf8, Utf8Error};
use thiserror::Error;

pub const CTRLF: &[u8] = b"\r\n";

/// Largest bulk string accepted from a peer (512 MiB, same as Redis' default).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;
/// A header line longer than this without a terminator is rejected instead of buffered.
const MAX_LINE_LEN: usize = 64 * 1024;
/// Arrays nested deeper than this in a reply are rejected.
const MAX_NESTING: usize = 32;

#[derive(Clone, Eq, Hash, PartialEq)]
pub enum Resp {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<Resp>),
}

#[derive(Debug, Error)]
pub enum RespError {
    #[error("Can not parse data as UTF-8")]
    UtfError(#[from] Utf8Error),

    #[error("Encountered unsuported type: {0:?}")]
    UnsuportedType(char),

    #[error("Can not parse data as integer")]
    NotAnInteger(#[from] std::num::ParseIntError),

    #[error("Data is not terminated with CTRLF")]
    NoCtrlf,

    #[error("Invalid length prefix {0}")]
    InvalidLength(i64),

    #[error("Line exceeds 64 KiB without a terminator")]
    LineTooLong,

    #[error("Expected an array of bulk strings")]
    NotACommand,

    #[error("Arrays nested too deeply")]
    TooDeep,
}

impl Resp {
    /// Parses one complete value from the start of `input`.
    ///
    /// Returns `Ok(None)` when `input` holds only a prefix of a value; the caller
    /// should buffer more bytes and retry. On success the second element is the
    /// exact number of bytes the value occupied.
    pub fn parse(input: &[u8]) -> Result<Option<(Self, usize)>, RespError> {
        parse_at(input, 0, 0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Resp::SimpleString(s) => {
                buf.push(b'+');
                buf.extend(s.as_bytes());
                buf.extend(CTRLF);
            }
            Resp::SimpleError(e) => {
                buf.push(b'-');
                buf.extend(e.as_bytes());
                buf.extend(CTRLF);
            }
            Resp::Integer(i) => {
                buf.push(b':');
                buf.extend(format!("{i}").as_bytes());
                buf.extend(CTRLF);
            }
            Resp::BulkString(b) => {
                buf.push(b'$');
                buf.extend(format!("{}", b.len()).as_bytes());
                buf.extend(CTRLF);
                buf.extend(b.iter());
                buf.extend(CTRLF);
            }
            Resp::NullBulkString => buf.extend(b"$-1\r\n"),
            Resp::Array(vec) => {
                buf.push(b'*');
                buf.extend(format!("{}", vec.len()).as_bytes());
                buf.extend(CTRLF);
                for i in vec {
                    i.encode_into(buf);
                }
            }
        }
    }

    pub fn simple_string(input: &str) -> Self {
        Self::SimpleString(input.to_string())
    }

    pub fn error(input: impl Into<String>) -> Self {
        Self::SimpleError(input.into())
    }

    pub fn bulk_string(input: impl Into<Bytes>) -> Self {
        Self::BulkString(input.into())
    }

    pub fn array(input: Vec<Resp>) -> Self {
        Self::Array(input)
    }

    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    pub fn expect_bulk_string(&self) -> Option<&Bytes> {
        match self {
            Resp::BulkString(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_simple_string(&self) -> Option<&str> {
        match self {
            Resp::SimpleString(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Resp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimpleString(s) => write!(f, "+\"{s}\""),
            Self::SimpleError(e) => write!(f, "-\"{e}\""),
            Self::Integer(i) => write!(f, "{i}"),
            Self::BulkString(bs) => write!(f, "${} {}", bs.len(), String::from_utf8_lossy(bs)),
            Self::NullBulkString => write!(f, "$-1"),
            Self::Array(array) => f.debug_list().entries(array).finish(),
        }
    }
}

/// Decodes one command frame (an array of bulk strings) from the start of `input`.
///
/// The returned byte count covers the whole frame, which is what a follower adds
/// to its replication offset. Frames are flat, so any element that is not a bulk
/// string is rejected as soon as its tag is seen.
pub fn decode_frame(input: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, RespError> {
    match input.first() {
        None => return Ok(None),
        Some(b'*') => {}
        Some(_) => return Err(RespError::NotACommand),
    }
    let Some((line, mut cursor)) = read_line(input, 1)? else {
        return Ok(None);
    };
    let len = checked_len(parse_integer(line)?, MAX_ARRAY_LEN)?;

    let mut args = Vec::with_capacity(len.min(64));
    for _ in 0..len {
        match input.get(cursor) {
            None => return Ok(None),
            Some(b'$') => {}
            Some(_) => return Err(RespError::NotACommand),
        }
        let Some((line, start)) = read_line(input, cursor + 1)? else {
            return Ok(None);
        };
        let Some((arg, after)) = bulk_payload(input, start, parse_integer(line)?)? else {
            return Ok(None);
        };
        args.push(arg);
        cursor = after;
    }

    Ok(Some((args, cursor)))
}

/// Frames a full-resync payload: `$<len>\r\n<bytes>` with no trailing terminator.
pub fn encode_snapshot(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 16);
    buf.push(b'$');
    buf.extend(format!("{}", payload.len()).as_bytes());
    buf.extend(CTRLF);
    buf.extend(payload);
    buf
}

/// Counterpart of [`encode_snapshot`]; returns the payload and bytes consumed.
pub fn parse_snapshot(input: &[u8]) -> Result<Option<(Bytes, usize)>, RespError> {
    match input.first() {
        None => return Ok(None),
        Some(b'$') => {}
        Some(other) => return Err(RespError::UnsuportedType(*other as char)),
    }
    let Some((line, start)) = read_line(input, 1)? else {
        return Ok(None);
    };
    let len = checked_len(parse_integer(line)?, MAX_BULK_LEN)?;
    let end = start + len;
    if input.len() < end {
        return Ok(None);
    }

    Ok(Some((Bytes::copy_from_slice(&input[start..end]), end)))
}

fn parse_at(input: &[u8], pos: usize, depth: usize) -> Result<Option<(Resp, usize)>, RespError> {
    if depth > MAX_NESTING {
        return Err(RespError::TooDeep);
    }
    let Some(&tag) = input.get(pos) else {
        return Ok(None);
    };
    if !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(RespError::UnsuportedType(tag as char));
    }
    let Some((line, next)) = read_line(input, pos + 1)? else {
        return Ok(None);
    };

    let parsed = match tag {
        b'+' => (Resp::SimpleString(from_utf8(line)?.to_string()), next),
        b'-' => (Resp::SimpleError(from_utf8(line)?.to_string()), next),
        b':' => (Resp::Integer(parse_integer(line)?), next),
        b'$' => match parse_integer(line)? {
            -1 => (Resp::NullBulkString, next),
            len => match bulk_payload(input, next, len)? {
                Some((payload, after)) => (Resp::BulkString(payload), after),
                None => return Ok(None),
            },
        },
        _ => {
            let len = checked_len(parse_integer(line)?, MAX_ARRAY_LEN)?;
            let mut array = Vec::with_capacity(len.min(64));
            let mut cursor = next;
            for _ in 0..len {
                let Some((value, after)) = parse_at(input, cursor, depth + 1)? else {
                    return Ok(None);
                };
                array.push(value);
                cursor = after;
            }
            (Resp::Array(array), cursor)
        }
    };

    Ok(Some(parsed))
}

/// Payload of a bulk string whose header line ended at `start`, and the position
/// right after its terminator.
fn bulk_payload(input: &[u8], start: usize, len: i64) -> Result<Option<(Bytes, usize)>, RespError> {
    let end = start + checked_len(len, MAX_BULK_LEN)?;
    if input.len() < end + CTRLF.len() {
        return Ok(None);
    }
    if &input[end..end + CTRLF.len()] != CTRLF {
        return Err(RespError::NoCtrlf);
    }
    Ok(Some((
        Bytes::copy_from_slice(&input[start..end]),
        end + CTRLF.len(),
    )))
}

fn read_line(input: &[u8], start: usize) -> Result<Option<(&[u8], usize)>, RespError> {
    let rest = &input[start..];
    match rest.windows(CTRLF.len()).position(|w| w == CTRLF) {
        Some(end) => Ok(Some((&rest[..end], start + end + CTRLF.len()))),
        None if rest.len() > MAX_LINE_LEN => Err(RespError::LineTooLong),
        None => Ok(None),
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, RespError> {
    Ok(from_utf8(line)?.parse::<i64>()?)
}

fn checked_len(len: i64, max: usize) -> Result<usize, RespError> {
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= max)
        .ok_or(RespError::InvalidLength(len))
}
