use bytes::Bytes;

use crate::command::{parse_integer, CommandError};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaOf {
    Leader { host: String, port: u16 },
    /// `REPLICAOF NO ONE` turns a follower back into a leader.
    NoOne,
}

impl ReplicaOf {
    pub fn parse(input: &[Bytes]) -> Result<Self, CommandError> {
        let [host, port] = input else {
            return Err(CommandError::arity("replicaof"));
        };
        if host.eq_ignore_ascii_case(b"no") && port.eq_ignore_ascii_case(b"one") {
            return Ok(Self::NoOne);
        }

        Ok(Self::Leader {
            host: String::from_utf8_lossy(host).into_owned(),
            port: parse_integer(port)?,
        })
    }
}
