use std::str::from_utf8;

use thiserror::Error;

pub const MAGIC: &str = "REDIS";
pub const VERSION: u32 = 11;
pub const EOF: u8 = 0xFF;
/// A zero checksum tells the loader that checksumming is disabled.
pub const CHECKSUM_LEN: usize = 8;
const HEADER_LEN: usize = 9;

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("Header parse error")]
    RdbHeaderParserError,

    #[error("Can not parse data as UTF-8")]
    Utf8ParserError(#[from] std::str::Utf8Error),

    #[error("Can not parse data as integer")]
    NotANumber(#[from] std::num::ParseIntError),
}

#[derive(Debug, PartialEq)]
pub struct RdbHeader {
    pub magic: String,
    pub version: u32,
}

impl Default for RdbHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC.to_string(),
            version: VERSION,
        }
    }
}

impl From<RdbHeader> for Vec<u8> {
    fn from(value: RdbHeader) -> Self {
        let mut buf = vec![];
        buf.extend(value.magic.as_bytes());
        buf.extend(format!("{:04}", value.version).as_bytes());
        buf
    }
}

impl TryFrom<&[u8]> for RdbHeader {
    type Error = RdbError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let magic = from_utf8(value.get(..5).ok_or(RdbError::RdbHeaderParserError)?)?;
        if magic != MAGIC {
            return Err(RdbError::RdbHeaderParserError);
        }
        let version = from_utf8(value.get(5..HEADER_LEN).ok_or(RdbError::RdbHeaderParserError)?)?;
        let version: u32 = version.parse()?;
        Ok(Self {
            magic: magic.to_string(),
            version,
        })
    }
}

/// The snapshot shipped at full resync. Only the empty database is ever produced.
#[derive(Debug, Default)]
pub struct Rdb {
    header: RdbHeader,
}

impl Rdb {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn encode(self) -> Vec<u8> {
        let mut buf: Vec<u8> = self.header.into();
        buf.push(EOF);
        buf.extend([0; CHECKSUM_LEN]);
        buf
    }
}
