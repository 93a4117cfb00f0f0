#![allow(dead_code)]

use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Context, Result};
use redis_replication::{connection::Frame, Config, Connection, Resp, Server};

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Starts a server on an ephemeral port and returns where it listens.
pub async fn spawn_server(config: Config) -> Result<SocketAddr> {
    let server = Server::bind(Config { port: 0, ..config }).await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.run());
    Ok(addr)
}

pub async fn spawn_leader() -> Result<SocketAddr> {
    spawn_server(Config::default()).await
}

pub async fn spawn_follower(leader: SocketAddr) -> Result<SocketAddr> {
    spawn_server(Config {
        replicaof: Some(format!("{} {}", leader.ip(), leader.port())),
        handshake_timeout_ms: 1_000,
        ..Config::default()
    })
    .await
}

pub fn command(args: &[&str]) -> Resp {
    Resp::array(
        args.iter()
            .map(|arg| Resp::bulk_string(arg.to_string()))
            .collect(),
    )
}

pub struct Client {
    pub connection: Connection,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let connection = Connection::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        Ok(Self { connection })
    }

    pub async fn send(&mut self, args: &[&str]) -> Result<()> {
        self.connection.write_resp(&command(args)).await?;
        Ok(())
    }

    pub async fn read(&mut self) -> Result<Resp> {
        tokio::time::timeout(REPLY_TIMEOUT, self.connection.read_resp())
            .await
            .context("timed out waiting for a reply")??
            .ok_or_else(|| anyhow!("server closed the connection"))
    }

    pub async fn request(&mut self, args: &[&str]) -> Result<Resp> {
        self.send(args).await?;
        self.read().await
    }

    pub async fn info(&mut self) -> Result<String> {
        let reply = self.request(&["INFO", "replication"]).await?;
        let info = reply
            .expect_bulk_string()
            .ok_or_else(|| anyhow!("INFO replied {reply:?}"))?;
        Ok(String::from_utf8(info.to_vec())?)
    }
}

/// Polls `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn next_frame<S>(connection: &mut Connection<S>) -> Result<Frame>
where
    S: tokio::io::AsyncRead + Unpin,
{
    tokio::time::timeout(REPLY_TIMEOUT, connection.read_frame())
        .await
        .context("timed out waiting for a frame")??
        .ok_or_else(|| anyhow!("peer closed the connection"))
}

pub fn args(frame: &Frame) -> Vec<String> {
    frame
        .args
        .iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}
