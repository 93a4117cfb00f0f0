use std::{future::Future, sync::Arc};

use bytes::Bytes;
use tracing::debug;

use crate::{
    command::{Command, CommandError, ReplConf, ReplicaOf, Set},
    config::Config,
    db::Db,
    replica::Replica,
    replication::Replication,
    resp::Resp,
};

/// What a session should do after a command ran.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Reply(Resp),
    /// The peer asked for a full resync and becomes a follower stream.
    FullResync,
    /// Nothing is written back, e.g. for `REPLCONF ACK`.
    Silent,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    db: Db,
    replication: Arc<Replication>,
    config: Arc<Config>,
    listening_port: u16,
}

impl Dispatcher {
    pub fn new(
        db: Db,
        replication: Arc<Replication>,
        config: Arc<Config>,
        listening_port: u16,
    ) -> Self {
        Self {
            db,
            replication,
            config,
            listening_port,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn replication(&self) -> &Arc<Replication> {
        &self.replication
    }

    /// Runs a client command. `frame` holds the bytes the command arrived as;
    /// writes are forwarded to followers exactly as received.
    pub async fn dispatch(&self, command: Command, frame: &Bytes) -> Outcome {
        match self.execute(command, frame).await {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Reply(err.into()),
        }
    }

    async fn execute(&self, command: Command, frame: &Bytes) -> Result<Outcome, CommandError> {
        let reply = match command {
            Command::Ping(None) => Resp::simple_string("PONG"),
            Command::Ping(Some(message)) | Command::Echo(message) => Resp::BulkString(message),
            Command::Get(get) => self
                .db
                .get(&get.key)
                .await
                .map_or(Resp::NullBulkString, Resp::BulkString),
            Command::Set(set) => self.propagated(frame, self.set(set)).await?,
            Command::Del(keys) => self.propagated(frame, self.del(keys)).await?,
            Command::Info(_) => Resp::bulk_string(self.replication.info().await),
            Command::ReplConf(ReplConf::Ack(_)) => return Ok(Outcome::Silent),
            Command::ReplConf(_) => Resp::ok(),
            Command::Psync { .. } => {
                if !self.replication.is_leader().await {
                    return Err(CommandError::Unsupported(
                        "replicas can not serve PSYNC, connect to the leader",
                    ));
                }
                return Ok(Outcome::FullResync);
            }
            Command::ReplicaOf(ReplicaOf::Leader { host, port }) => {
                self.replicate_from(host, port).await;
                Resp::ok()
            }
            Command::ReplicaOf(ReplicaOf::NoOne) => {
                self.replication.promote().await;
                Resp::ok()
            }
            Command::Wait { replicas, timeout } => {
                if !self.replication.is_leader().await {
                    return Err(CommandError::Unsupported(
                        "WAIT cannot be used with replica instances",
                    ));
                }
                let acked = self.replication.wait_for_acks(replicas, timeout).await;
                Resp::Integer(acked as i64)
            }
        };

        Ok(Outcome::Reply(reply))
    }

    /// Applies a command received on the replication stream. Nothing is replied
    /// and nothing is propagated.
    pub async fn apply_replicated(&self, command: Command) {
        match command {
            Command::Set(set) => {
                self.set(set).await;
            }
            Command::Del(keys) => {
                self.del(keys).await;
            }
            Command::Ping(_) => {}
            other => debug!(command = other.name(), "ignoring replicated command"),
        }
    }

    /// Starts following `host:port` in the background.
    pub async fn replicate_from(&self, host: String, port: u16) {
        let replica = Replica::new(
            host.clone(),
            port,
            self.clone(),
            self.listening_port,
            self.config.handshake_timeout(),
        );
        self.replication.follow(host, port, replica).await;
    }

    /// Applies `write` to the store and forwards `frame` to every follower,
    /// both under the follower registry lock.
    async fn propagated(
        &self,
        frame: &Bytes,
        write: impl Future<Output = Resp>,
    ) -> Result<Resp, CommandError> {
        let Some(propagation) = self.replication.begin_write().await else {
            return Err(CommandError::ReadOnly);
        };
        let reply = write.await;
        propagation.propagate(frame.clone());
        Ok(reply)
    }

    async fn set(&self, set: Set) -> Resp {
        self.db.set(set.key, set.value, set.ttl).await;
        Resp::ok()
    }

    async fn del(&self, keys: Vec<Bytes>) -> Resp {
        let mut removed = 0;
        for key in keys {
            if self.db.delete(&key).await {
                removed += 1;
            }
        }
        Resp::Integer(removed)
    }
}
