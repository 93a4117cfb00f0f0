use std::{future::Future, time::Duration};

use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::{
    command::{Command, ReplConf},
    connection::{Connection, ConnectionError},
    dispatcher::Dispatcher,
    rdb::RdbHeader,
    resp::Resp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Pinged,
    PortAcked,
    CapaAcked,
    AwaitingFullResync,
    ReceivingSnapshot,
    Streaming,
    Failed,
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("unexpected reply {reply} in state {state:?}")]
    UnexpectedReply { state: HandshakeState, reply: String },

    #[error("handshake step out of order in state {0:?}")]
    OutOfOrder(HandshakeState),

    #[error("leader did not answer within {0:?}")]
    Timeout(Duration),

    #[error("leader closed the connection")]
    Closed,

    #[error("can not reach leader")]
    Connect(#[source] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// The follower half of the replication handshake, kept free of I/O.
///
/// The driver asks [`Handshake::request`] what to send, reports the send with
/// [`Handshake::sent`], and feeds replies back through [`Handshake::on_reply`]
/// and [`Handshake::on_snapshot`]. Any unexpected input moves it to `Failed`.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    listening_port: u16,
    leader_replication_id: Option<String>,
    offset: u64,
}

impl Handshake {
    pub fn new(listening_port: u16) -> Self {
        Self {
            state: HandshakeState::Init,
            listening_port,
            leader_replication_id: None,
            offset: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Leader offset announced in `+FULLRESYNC`; the follower counts from here.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn leader_replication_id(&self) -> Option<&str> {
        self.leader_replication_id.as_deref()
    }

    pub fn request(&self) -> Option<Command> {
        match self.state {
            HandshakeState::Init => Some(Command::Ping(None)),
            HandshakeState::Pinged => {
                Some(Command::ReplConf(ReplConf::ListeningPort(self.listening_port)))
            }
            HandshakeState::PortAcked => Some(Command::ReplConf(ReplConf::Capa(vec![
                Bytes::from_static(b"psync2"),
            ]))),
            HandshakeState::CapaAcked => Some(Command::Psync {
                replication_id: "?".to_string(),
                offset: -1,
            }),
            _ => None,
        }
    }

    /// `PSYNC` expects no simple acknowledgement, so sending it moves the state on.
    pub fn sent(&mut self) {
        if self.state == HandshakeState::CapaAcked {
            self.state = HandshakeState::AwaitingFullResync;
        }
    }

    pub fn on_reply(&mut self, reply: &Resp) -> Result<HandshakeState, ReplicationError> {
        let next = match (self.state, reply.expect_simple_string()) {
            (HandshakeState::Init, Some(pong)) if pong.eq_ignore_ascii_case("PONG") => {
                HandshakeState::Pinged
            }
            (HandshakeState::Pinged, Some(ok)) if ok.eq_ignore_ascii_case("OK") => {
                HandshakeState::PortAcked
            }
            (HandshakeState::PortAcked, Some(ok)) if ok.eq_ignore_ascii_case("OK") => {
                HandshakeState::CapaAcked
            }
            (HandshakeState::AwaitingFullResync, Some(line)) => match parse_fullresync(line) {
                Some((replication_id, offset)) => {
                    self.leader_replication_id = Some(replication_id);
                    self.offset = offset;
                    HandshakeState::ReceivingSnapshot
                }
                None => return Err(self.unexpected(reply)),
            },
            _ => return Err(self.unexpected(reply)),
        };
        self.state = next;
        Ok(next)
    }

    pub fn on_snapshot(&mut self, payload: &[u8]) -> Result<HandshakeState, ReplicationError> {
        if self.state != HandshakeState::ReceivingSnapshot {
            let state = self.state;
            self.fail();
            return Err(ReplicationError::OutOfOrder(state));
        }
        match RdbHeader::try_from(payload) {
            Ok(header) => debug!(version = header.version, len = payload.len(), "snapshot received"),
            Err(err) => warn!(len = payload.len(), "snapshot has no valid header: {err}"),
        }
        self.state = HandshakeState::Streaming;
        Ok(self.state)
    }

    pub fn fail(&mut self) {
        self.state = HandshakeState::Failed;
    }

    fn unexpected(&mut self, reply: &Resp) -> ReplicationError {
        let state = self.state;
        self.fail();
        ReplicationError::UnexpectedReply {
            state,
            reply: format!("{reply:?}"),
        }
    }
}

fn parse_fullresync(line: &str) -> Option<(String, u64)> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.eq_ignore_ascii_case("FULLRESYNC") {
        return None;
    }
    let replication_id = parts.next()?.to_string();
    let offset = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((replication_id, offset))
}

/// Outbound link from a follower to its leader.
#[derive(Debug)]
pub struct Replica {
    host: String,
    port: u16,
    dispatcher: Dispatcher,
    listening_port: u16,
    timeout: Duration,
}

impl Replica {
    pub fn new(
        host: String,
        port: u16,
        dispatcher: Dispatcher,
        listening_port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            host,
            port,
            dispatcher,
            listening_port,
            timeout,
        }
    }

    /// Runs the link until the leader goes away. There is no reconnect; a new
    /// `REPLICAOF` starts a fresh link.
    pub async fn run(self) {
        match self.start().await {
            Ok(()) => info!(host = %self.host, port = self.port, "leader closed the replication stream"),
            Err(err) => error!(host = %self.host, port = self.port, "replication failed: {err}"),
        }
        self.dispatcher.replication().set_link_up(false);
    }

    async fn start(&self) -> Result<(), ReplicationError> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ReplicationError::Timeout(self.timeout))?
        .map_err(ReplicationError::Connect)?;
        let mut connection = Connection::new(stream);

        let mut handshake = Handshake::new(self.listening_port);
        if let Err(err) = self.handshake(&mut connection, &mut handshake).await {
            handshake.fail();
            return Err(err);
        }

        let replication = self.dispatcher.replication();
        replication.reset_offset(handshake.offset());
        replication.set_link_up(true);
        info!(
            leader_replication_id = handshake.leader_replication_id().unwrap_or_default(),
            offset = handshake.offset(),
            "full resync done, streaming from leader"
        );

        self.stream(connection).await
    }

    async fn handshake(
        &self,
        connection: &mut Connection,
        handshake: &mut Handshake,
    ) -> Result<(), ReplicationError> {
        loop {
            if let Some(request) = handshake.request() {
                let request: Resp = request.into();
                connection.write_resp(&request).await?;
                handshake.sent();
            }
            match handshake.state() {
                HandshakeState::Init
                | HandshakeState::Pinged
                | HandshakeState::PortAcked
                | HandshakeState::AwaitingFullResync => {
                    let reply = self.bounded(connection.read_resp()).await?;
                    let state = handshake.on_reply(&reply)?;
                    debug!(?state, "handshake step");
                }
                HandshakeState::ReceivingSnapshot => {
                    let payload = self.bounded(connection.read_snapshot()).await?;
                    handshake.on_snapshot(&payload)?;
                }
                HandshakeState::Streaming => return Ok(()),
                state @ (HandshakeState::CapaAcked | HandshakeState::Failed) => {
                    return Err(ReplicationError::OutOfOrder(state))
                }
            }
        }
    }

    /// Applies the leader's command stream. The offset grows by the exact size
    /// of every frame; a `GETACK` is answered with the offset before its own bytes.
    async fn stream(&self, mut connection: Connection) -> Result<(), ReplicationError> {
        let replication = self.dispatcher.replication();
        while let Some(frame) = connection.read_frame().await? {
            match Command::parse(&frame.args) {
                Ok(Command::ReplConf(ReplConf::GetAck)) => {
                    let ack: Resp = Command::ReplConf(ReplConf::Ack(replication.offset())).into();
                    connection.write_resp(&ack).await?;
                }
                Ok(command) => self.dispatcher.apply_replicated(command).await,
                Err(err) => warn!("skipping replicated frame: {err}"),
            }
            replication.advance_offset(frame.len() as u64);
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        read: impl Future<Output = Result<Option<T>, ConnectionError>>,
    ) -> Result<T, ReplicationError> {
        tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| ReplicationError::Timeout(self.timeout))??
            .ok_or(ReplicationError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdb::Rdb;

    fn drive_to_fullresync(handshake: &mut Handshake) {
        handshake.on_reply(&Resp::simple_string("PONG")).unwrap();
        handshake.on_reply(&Resp::ok()).unwrap();
        handshake.on_reply(&Resp::ok()).unwrap();
        assert!(matches!(handshake.request(), Some(Command::Psync { .. })));
        handshake.sent();
    }

    #[test]
    fn walks_every_state() {
        let mut handshake = Handshake::new(6380);
        assert_eq!(handshake.request(), Some(Command::Ping(None)));
        handshake.sent();
        assert_eq!(handshake.state(), HandshakeState::Init);

        assert_eq!(
            handshake.on_reply(&Resp::simple_string("PONG")).unwrap(),
            HandshakeState::Pinged
        );
        assert_eq!(
            handshake.request(),
            Some(Command::ReplConf(ReplConf::ListeningPort(6380)))
        );
        assert_eq!(handshake.on_reply(&Resp::ok()).unwrap(), HandshakeState::PortAcked);
        assert_eq!(
            handshake.request(),
            Some(Command::ReplConf(ReplConf::Capa(vec![Bytes::from("psync2")])))
        );
        assert_eq!(handshake.on_reply(&Resp::ok()).unwrap(), HandshakeState::CapaAcked);
        handshake.sent();
        assert_eq!(handshake.state(), HandshakeState::AwaitingFullResync);
        assert_eq!(handshake.request(), None);

        let id = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";
        let reply = Resp::SimpleString(format!("FULLRESYNC {id} 120"));
        assert_eq!(
            handshake.on_reply(&reply).unwrap(),
            HandshakeState::ReceivingSnapshot
        );
        assert_eq!(handshake.leader_replication_id(), Some(id));
        assert_eq!(handshake.offset(), 120);

        assert_eq!(
            handshake.on_snapshot(&Rdb::empty().encode()).unwrap(),
            HandshakeState::Streaming
        );
    }

    #[test]
    fn wrong_reply_fails() {
        let mut handshake = Handshake::new(6380);
        let err = handshake.on_reply(&Resp::error("ERR nope")).unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::UnexpectedReply {
                state: HandshakeState::Init,
                ..
            }
        ));
        assert_eq!(handshake.state(), HandshakeState::Failed);
        assert_eq!(handshake.request(), None);
    }

    #[test]
    fn malformed_fullresync_fails() {
        let mut handshake = Handshake::new(6380);
        drive_to_fullresync(&mut handshake);
        assert!(handshake
            .on_reply(&Resp::simple_string("FULLRESYNC abc notanumber"))
            .is_err());
        assert_eq!(handshake.state(), HandshakeState::Failed);

        let mut handshake = Handshake::new(6380);
        drive_to_fullresync(&mut handshake);
        assert!(handshake.on_reply(&Resp::simple_string("CONTINUE")).is_err());
    }

    #[test]
    fn snapshot_before_fullresync_fails() {
        let mut handshake = Handshake::new(6380);
        assert!(matches!(
            handshake.on_snapshot(b"REDIS0011"),
            Err(ReplicationError::OutOfOrder(HandshakeState::Init))
        ));
        assert_eq!(handshake.state(), HandshakeState::Failed);
    }

    #[test]
    fn fullresync_line_parsing() {
        assert_eq!(
            parse_fullresync("FULLRESYNC abc 0"),
            Some(("abc".to_string(), 0))
        );
        assert_eq!(parse_fullresync("FULLRESYNC abc"), None);
        assert_eq!(parse_fullresync("FULLRESYNC abc 1 2"), None);
        assert_eq!(parse_fullresync("OK"), None);
    }
}
