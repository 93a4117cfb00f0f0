use clap::Parser;
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[command(name = "redis-replication", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, default_value_t = 6379)]
    pub port: u16,

    /// Leader to replicate from, as "<host> <port>"
    #[arg(long)]
    pub replicaof: Option<String>,

    /// How often expired keys are swept from memory
    #[arg(long, default_value_t = 10_000)]
    pub sweep_interval_ms: u64,

    /// Upper bound on each step of the replication handshake
    #[arg(long, default_value_t = 5_000)]
    pub handshake_timeout_ms: u64,
}

impl Config {
    /// `--replicaof` split into host and port.
    pub fn leader(&self) -> Option<(String, u16)> {
        let (host, port) = self.replicaof.as_deref()?.trim().split_once(' ')?;
        Some((host.to_string(), port.trim().parse().ok()?))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            replicaof: None,
            sweep_interval_ms: 10_000,
            handshake_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replicaof() {
        let config = Config::parse_from(["redis", "--port", "6380", "--replicaof", "localhost 6379"]);
        assert_eq!(config.port, 6380);
        assert_eq!(config.leader(), Some(("localhost".to_string(), 6379)));
    }

    #[test]
    fn malformed_replicaof_is_ignored() {
        let config = Config {
            replicaof: Some("localhost".to_string()),
            ..Config::default()
        };
        assert_eq!(config.leader(), None);
    }
}
