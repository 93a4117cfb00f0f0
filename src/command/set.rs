use std::time::Duration;

use bytes::Bytes;

use crate::command::{parse_integer, CommandError};

/// `SET key value [EX seconds | PX milliseconds]`
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

impl Set {
    pub fn parse(input: &[Bytes]) -> Result<Self, CommandError> {
        let [key, value, options @ ..] = input else {
            return Err(CommandError::arity("set"));
        };

        let mut ttl = None;
        let mut options = options.iter();
        while let Some(option) = options.next() {
            let millis_per_unit: u64 = match option.to_ascii_uppercase().as_slice() {
                b"PX" => 1,
                b"EX" => 1000,
                _ => return Err(CommandError::syntax()),
            };
            let amount = options.next().ok_or_else(CommandError::syntax)?;
            if ttl.is_some() {
                return Err(CommandError::syntax());
            }
            let amount: i64 = parse_integer(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidArgument(
                    "invalid expire time in 'set' command".to_string(),
                ));
            }
            ttl = Some(Duration::from_millis(
                (amount as u64).saturating_mul(millis_per_unit),
            ));
        }

        Ok(Self {
            key: key.clone(),
            value: value.clone(),
            ttl,
        })
    }
}
