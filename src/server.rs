use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    config::Config, db::Db, dispatcher::Dispatcher, replication::Replication, session::Session,
};

#[derive(Debug)]
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    db: Db,
    replication: Arc<Replication>,
}

impl Server {
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Can not listen on {}:{}", config.host, config.port))?;
        Ok(Self {
            config: Arc::new(config),
            listener,
            db: Db::new(),
            replication: Arc::new(Replication::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn replication(&self) -> &Arc<Replication> {
        &self.replication
    }

    /// Accepts connections forever, one task per connection.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        let dispatcher = Dispatcher::new(
            self.db.clone(),
            self.replication.clone(),
            self.config.clone(),
            addr.port(),
        );
        let _sweep = self.db.spawn_expiry_sweep(self.config.sweep_interval());

        if let Some((host, port)) = self.config.leader() {
            dispatcher.replicate_from(host, port).await;
        } else if self.config.replicaof.is_some() {
            warn!(replicaof = ?self.config.replicaof, "ignoring malformed --replicaof");
        }

        info!(%addr, replication_id = self.replication.replication_id(), "listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            };
            let session = Session::new(stream, peer, dispatcher.clone());
            tokio::spawn(async move {
                if let Err(err) = session.run().await {
                    warn!(%peer, "session ended: {err}");
                }
            });
        }
    }
}
