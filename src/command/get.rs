use bytes::Bytes;

use crate::command::CommandError;

#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    pub key: Bytes,
}

impl Get {
    pub fn parse(input: &[Bytes]) -> Result<Self, CommandError> {
        match input {
            [key] => Ok(Self { key: key.clone() }),
            _ => Err(CommandError::arity("get")),
        }
    }
}
