use bytes::Bytes;

use crate::{
    command::{parse_integer, CommandError},
    resp::Resp,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplConf {
    ListeningPort(u16),
    Capa(Vec<Bytes>),
    /// `REPLCONF GETACK *`, sent by a leader down the replication stream.
    GetAck,
    /// `REPLCONF ACK <offset>`, a follower's answer to `GETACK`.
    Ack(u64),
}

impl ReplConf {
    pub fn parse(input: &[Bytes]) -> Result<Self, CommandError> {
        let (option, rest) = input
            .split_first()
            .ok_or_else(|| CommandError::arity("replconf"))?;
        match (option.to_ascii_lowercase().as_slice(), rest) {
            (b"listening-port", [port]) => Ok(Self::ListeningPort(parse_integer(port)?)),
            // `capa eof capa psync2` lists several capabilities in one call
            (b"capa", [_, ..]) => Ok(Self::Capa(
                rest.iter()
                    .filter(|arg| !arg.eq_ignore_ascii_case(b"capa"))
                    .cloned()
                    .collect(),
            )),
            (b"getack", [_]) => Ok(Self::GetAck),
            (b"ack", [offset]) => Ok(Self::Ack(parse_integer(offset)?)),
            (b"listening-port" | b"capa" | b"getack" | b"ack", _) => {
                Err(CommandError::arity("replconf"))
            }
            _ => Err(CommandError::InvalidArgument(format!(
                "Unrecognized REPLCONF option: {}",
                String::from_utf8_lossy(option)
            ))),
        }
    }

    pub(crate) fn into_args(self) -> Vec<Resp> {
        match self {
            ReplConf::ListeningPort(port) => vec![
                Resp::bulk_string("listening-port"),
                Resp::bulk_string(port.to_string()),
            ],
            ReplConf::Capa(capabilities) => capabilities
                .into_iter()
                .flat_map(|capa| [Resp::bulk_string("capa"), Resp::BulkString(capa)])
                .collect(),
            ReplConf::GetAck => vec![Resp::bulk_string("GETACK"), Resp::bulk_string("*")],
            ReplConf::Ack(offset) => {
                vec![Resp::bulk_string("ACK"), Resp::bulk_string(offset.to_string())]
            }
        }
    }
}
