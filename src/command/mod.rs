use std::{str::FromStr, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::resp::Resp;

mod get;
mod replconf;
mod replicaof;
mod set;

pub use get::Get;
pub use replconf::ReplConf;
pub use replicaof::ReplicaOf;
pub use set::Set;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping(Option<Bytes>),
    Echo(Bytes),
    Get(Get),
    Set(Set),
    Del(Vec<Bytes>),
    Info(Option<String>),
    ReplConf(ReplConf),
    Psync { replication_id: String, offset: i64 },
    ReplicaOf(ReplicaOf),
    Wait { replicas: usize, timeout: Duration },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR {0}")]
    InvalidArgument(String),

    #[error("READONLY You can't write against a read only replica.")]
    ReadOnly,

    #[error("ERR {0}")]
    Unsupported(&'static str),
}

impl CommandError {
    pub fn arity(command: &str) -> Self {
        Self::InvalidArgument(format!("wrong number of arguments for '{command}' command"))
    }

    pub fn syntax() -> Self {
        Self::InvalidArgument("syntax error".to_string())
    }
}

impl From<CommandError> for Resp {
    fn from(err: CommandError) -> Self {
        Resp::error(err.to_string())
    }
}

impl Command {
    /// Builds a command from the arguments of a decoded frame. The command name
    /// is matched case-insensitively.
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| CommandError::InvalidArgument("empty command".to_string()))?;
        let name = String::from_utf8_lossy(name);
        let command = match name.to_ascii_uppercase().as_str() {
            "PING" => match rest {
                [] => Command::Ping(None),
                [message] => Command::Ping(Some(message.clone())),
                _ => return Err(CommandError::arity("ping")),
            },
            "ECHO" => match rest {
                [message] => Command::Echo(message.clone()),
                _ => return Err(CommandError::arity("echo")),
            },
            "GET" => Command::Get(Get::parse(rest)?),
            "SET" => Command::Set(Set::parse(rest)?),
            "DEL" if !rest.is_empty() => Command::Del(rest.to_vec()),
            "DEL" => return Err(CommandError::arity("del")),
            "INFO" => match rest {
                [] => Command::Info(None),
                [section] => {
                    Command::Info(Some(String::from_utf8_lossy(section).to_ascii_lowercase()))
                }
                _ => return Err(CommandError::arity("info")),
            },
            "REPLCONF" => Command::ReplConf(ReplConf::parse(rest)?),
            "PSYNC" => match rest {
                [replication_id, offset] => Command::Psync {
                    replication_id: String::from_utf8_lossy(replication_id).into_owned(),
                    offset: parse_integer(offset)?,
                },
                _ => return Err(CommandError::arity("psync")),
            },
            "REPLICAOF" | "SLAVEOF" => Command::ReplicaOf(ReplicaOf::parse(rest)?),
            "WAIT" => match rest {
                [replicas, timeout] => Command::Wait {
                    replicas: parse_integer(replicas)?,
                    timeout: Duration::from_millis(parse_integer(timeout)?),
                },
                _ => return Err(CommandError::arity("wait")),
            },
            _ => return Err(CommandError::UnknownCommand(name.into_owned())),
        };

        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::Echo(_) => "ECHO",
            Command::Get(_) => "GET",
            Command::Set(_) => "SET",
            Command::Del(_) => "DEL",
            Command::Info(_) => "INFO",
            Command::ReplConf(_) => "REPLCONF",
            Command::Psync { .. } => "PSYNC",
            Command::ReplicaOf(_) => "REPLICAOF",
            Command::Wait { .. } => "WAIT",
        }
    }
}

impl From<Command> for Resp {
    fn from(command: Command) -> Self {
        let mut array = vec![Resp::bulk_string(command.name())];
        match command {
            Command::Ping(message) => array.extend(message.map(Resp::BulkString)),
            Command::Echo(message) => array.push(Resp::BulkString(message)),
            Command::Get(get) => array.push(Resp::BulkString(get.key)),
            Command::Set(set) => {
                array.push(Resp::BulkString(set.key));
                array.push(Resp::BulkString(set.value));
                if let Some(ttl) = set.ttl {
                    array.push(Resp::bulk_string("PX"));
                    array.push(Resp::bulk_string(ttl.as_millis().to_string()));
                }
            }
            Command::Del(keys) => array.extend(keys.into_iter().map(Resp::BulkString)),
            Command::Info(section) => array.extend(section.map(Resp::bulk_string)),
            Command::ReplConf(replconf) => array.extend(replconf.into_args()),
            Command::Psync {
                replication_id,
                offset,
            } => {
                array.push(Resp::bulk_string(replication_id));
                array.push(Resp::bulk_string(offset.to_string()));
            }
            Command::ReplicaOf(ReplicaOf::Leader { host, port }) => {
                array.push(Resp::bulk_string(host));
                array.push(Resp::bulk_string(port.to_string()));
            }
            Command::ReplicaOf(ReplicaOf::NoOne) => {
                array.push(Resp::bulk_string("NO"));
                array.push(Resp::bulk_string("ONE"));
            }
            Command::Wait { replicas, timeout } => {
                array.push(Resp::bulk_string(replicas.to_string()));
                array.push(Resp::bulk_string(timeout.as_millis().to_string()));
            }
        }

        Resp::Array(array)
    }
}

pub(crate) fn parse_integer<T: FromStr>(arg: &Bytes) -> Result<T, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            CommandError::InvalidArgument("value is not an integer or out of range".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::decode_frame;

    fn args(input: &[&str]) -> Vec<Bytes> {
        input
            .iter()
            .map(|arg| Bytes::copy_from_slice(arg.as_bytes()))
            .collect()
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Command::parse(&args(&["ping"])), Ok(Command::Ping(None)));
        assert_eq!(
            Command::parse(&args(&["eChO", "hi"])),
            Ok(Command::Echo(Bytes::from("hi")))
        );
    }

    #[test]
    fn set_with_expiry() {
        let Command::Set(set) = Command::parse(&args(&["SET", "k", "v", "px", "100"])).unwrap()
        else {
            panic!("expected SET");
        };
        assert_eq!(set.key, Bytes::from("k"));
        assert_eq!(set.ttl, Some(Duration::from_millis(100)));

        let Command::Set(set) = Command::parse(&args(&["SET", "k", "v", "EX", "2"])).unwrap()
        else {
            panic!("expected SET");
        };
        assert_eq!(set.ttl, Some(Duration::from_secs(2)));
    }

    #[test]
    fn invalid_arguments() {
        let not_an_integer =
            CommandError::InvalidArgument("value is not an integer or out of range".to_string());
        assert_eq!(
            Command::parse(&args(&["SET", "k", "v", "PX", "abc"])),
            Err(not_an_integer)
        );
        assert_eq!(
            Command::parse(&args(&["SET", "k", "v", "PX"])),
            Err(CommandError::syntax())
        );
        assert_eq!(
            Command::parse(&args(&["SET", "k", "v", "KEEPTTL"])),
            Err(CommandError::syntax())
        );
        assert!(matches!(
            Command::parse(&args(&["SET", "k", "v", "PX", "0"])),
            Err(CommandError::InvalidArgument(_))
        ));
        assert_eq!(
            Command::parse(&args(&["GET"])),
            Err(CommandError::arity("get"))
        );
        assert_eq!(
            Command::parse(&args(&["DEL"])),
            Err(CommandError::arity("del"))
        );
        assert_eq!(
            Command::parse(&args(&["ECHO"])),
            Err(CommandError::arity("echo"))
        );
    }

    #[test]
    fn unknown_command() {
        let err = Command::parse(&args(&["FLUSHALL"])).unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("FLUSHALL".to_string()));
        assert_eq!(Resp::from(err).encode(), b"-ERR unknown command 'FLUSHALL'\r\n");
    }

    #[test]
    fn replication_commands() {
        assert_eq!(
            Command::parse(&args(&["REPLCONF", "listening-port", "6380"])),
            Ok(Command::ReplConf(ReplConf::ListeningPort(6380)))
        );
        assert_eq!(
            Command::parse(&args(&["REPLCONF", "capa", "eof", "capa", "psync2"])),
            Ok(Command::ReplConf(ReplConf::Capa(args(&["eof", "psync2"]))))
        );
        assert_eq!(
            Command::parse(&args(&["REPLCONF", "GETACK", "*"])),
            Ok(Command::ReplConf(ReplConf::GetAck))
        );
        assert_eq!(
            Command::parse(&args(&["REPLCONF", "ACK", "154"])),
            Ok(Command::ReplConf(ReplConf::Ack(154)))
        );
        assert_eq!(
            Command::parse(&args(&["PSYNC", "?", "-1"])),
            Ok(Command::Psync {
                replication_id: "?".to_string(),
                offset: -1
            })
        );
        assert_eq!(
            Command::parse(&args(&["REPLICAOF", "localhost", "6379"])),
            Ok(Command::ReplicaOf(ReplicaOf::Leader {
                host: "localhost".to_string(),
                port: 6379
            }))
        );
        assert_eq!(
            Command::parse(&args(&["replicaof", "no", "one"])),
            Ok(Command::ReplicaOf(ReplicaOf::NoOne))
        );
        assert_eq!(
            Command::parse(&args(&["WAIT", "1", "500"])),
            Ok(Command::Wait {
                replicas: 1,
                timeout: Duration::from_millis(500)
            })
        );
    }

    #[test]
    fn encoded_commands_parse_back() {
        let commands = [
            Command::Ping(None),
            Command::ReplConf(ReplConf::ListeningPort(6380)),
            Command::ReplConf(ReplConf::Capa(vec![Bytes::from("psync2")])),
            Command::ReplConf(ReplConf::GetAck),
            Command::ReplConf(ReplConf::Ack(31)),
            Command::Psync {
                replication_id: "?".to_string(),
                offset: -1,
            },
            Command::Set(Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                ttl: Some(Duration::from_millis(250)),
            }),
            Command::Del(args(&["a", "b"])),
        ];
        for command in commands {
            let wire = Resp::from(command.clone()).encode();
            let (decoded, _) = decode_frame(&wire).unwrap().unwrap();
            assert_eq!(Command::parse(&decoded), Ok(command));
        }
    }

    #[test]
    fn getack_wire_form() {
        let wire = Resp::from(Command::ReplConf(ReplConf::GetAck)).encode();
        assert_eq!(wire, b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n");
    }
}
