use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    command::{Command, ReplConf},
    connection::{Connection, ConnectionError},
    dispatcher::{Dispatcher, Outcome},
    replication::FollowerId,
    resp::Resp,
};

/// One accepted connection. It serves client commands until the peer issues
/// `PSYNC`, after which it turns into a follower stream.
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    listening_port: Option<u16>,
}

impl Session {
    pub fn new(stream: TcpStream, addr: SocketAddr, dispatcher: Dispatcher) -> Self {
        Self {
            connection: Connection::new(stream),
            addr,
            dispatcher,
            listening_port: None,
        }
    }

    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(peer = %self.addr, "accepted new connection");
        loop {
            let frame = match self.connection.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(ConnectionError::Protocol(err)) => {
                    let reply = Resp::error(format!("ERR Protocol error: {err}"));
                    let _ = self.connection.write_resp(&reply).await;
                    let _ = self.connection.shutdown().await;
                    return Err(err.into());
                }
                Err(err) => return Err(err),
            };

            let command = match Command::parse(&frame.args) {
                Ok(command) => command,
                Err(err) => {
                    debug!(peer = %self.addr, "rejected command: {err}");
                    self.connection.write_resp(&err.into()).await?;
                    continue;
                }
            };
            if let Command::ReplConf(ReplConf::ListeningPort(port)) = &command {
                self.listening_port = Some(*port);
            }

            match self.dispatcher.dispatch(command, &frame.raw).await {
                Outcome::Reply(reply) => self.connection.write_resp(&reply).await?,
                Outcome::Silent => {}
                Outcome::FullResync => return self.serve_follower().await,
            }
        }
        debug!(peer = %self.addr, "connection closed");
        Ok(())
    }

    /// From here on the leader only writes the replication stream to this peer;
    /// what the follower sends back is read for `REPLCONF ACK`.
    async fn serve_follower(self) -> Result<(), ConnectionError> {
        let Session {
            connection,
            addr,
            dispatcher,
            listening_port,
        } = self;
        let (mut reader, writer) = connection.into_split();
        let replication = dispatcher.replication();
        let id = replication
            .register_follower(addr, listening_port, writer)
            .await;

        let result = read_acks(&mut reader, &dispatcher, id).await;
        replication.remove_follower(id).await;
        result
    }
}

async fn read_acks<S>(
    reader: &mut Connection<S>,
    dispatcher: &Dispatcher,
    id: FollowerId,
) -> Result<(), ConnectionError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    while let Some(frame) = reader.read_frame().await? {
        match Command::parse(&frame.args) {
            Ok(Command::ReplConf(ReplConf::Ack(offset))) => {
                dispatcher.replication().record_ack(id, offset).await
            }
            Ok(command) => debug!(follower = id, command = command.name(), "ignored"),
            Err(err) => warn!(follower = id, "bad frame from follower: {err}"),
        }
    }
    Ok(())
}
