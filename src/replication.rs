use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::{mpsc, watch, Mutex, MutexGuard, RwLock, RwLockReadGuard},
    task::AbortHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    command::{Command, ReplConf},
    rdb::Rdb,
    replica::Replica,
    resp::{self, Resp},
    utils::generate_replication_id,
};

/// Frames a follower may have queued before it is considered too slow and dropped.
pub const FOLLOWER_QUEUE_DEPTH: usize = 1024;

pub type FollowerId = u64;

#[derive(Debug)]
pub enum Role {
    Leader,
    Follower {
        host: String,
        port: u16,
        link: AbortHandle,
    },
}

#[derive(Debug)]
struct FollowerHandle {
    addr: SocketAddr,
    listening_port: Option<u16>,
    sender: mpsc::Sender<Bytes>,
    acked_offset: u64,
}

type Followers = HashMap<FollowerId, FollowerHandle>;

/// Replication state of one server instance.
///
/// `offset` counts stream bytes: produced while leading, consumed while following.
/// On a leader it only moves while the follower registry is locked, which keeps
/// it consistent with what every follower has been sent.
#[derive(Debug)]
pub struct Replication {
    replication_id: String,
    offset: AtomicU64,
    role: RwLock<Role>,
    link_up: AtomicBool,
    followers: Mutex<Followers>,
    next_follower_id: AtomicU64,
    acks: watch::Sender<()>,
}

impl Default for Replication {
    fn default() -> Self {
        Self::new()
    }
}

impl Replication {
    pub fn new() -> Self {
        let (acks, _) = watch::channel(());
        Self {
            replication_id: generate_replication_id(),
            offset: AtomicU64::new(0),
            role: RwLock::new(Role::Leader),
            link_up: AtomicBool::new(false),
            followers: Mutex::new(HashMap::new()),
            next_follower_id: AtomicU64::new(1),
            acks,
        }
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub async fn is_leader(&self) -> bool {
        matches!(*self.role.read().await, Role::Leader)
    }

    pub async fn follower_count(&self) -> usize {
        self.followers.lock().await.len()
    }

    /// Locks the follower registry for one write, or returns `None` when this
    /// instance is not a leader. The store mutation should happen while the
    /// returned guard is alive so followers see writes in the order they were
    /// applied. The guard also holds the role, so a concurrent `REPLICAOF` waits
    /// for the write to finish.
    pub async fn begin_write(&self) -> Option<Propagation<'_>> {
        let role = self.role.read().await;
        if !matches!(*role, Role::Leader) {
            return None;
        }
        Some(Propagation {
            offset: &self.offset,
            _role: role,
            followers: self.followers.lock().await,
        })
    }

    /// Registers a follower that asked for a full resync.
    ///
    /// The `+FULLRESYNC` line and the snapshot go out through the follower's own
    /// queue, ahead of any write propagated after registration.
    pub async fn register_follower(
        self: &Arc<Self>,
        addr: SocketAddr,
        listening_port: Option<u16>,
        writer: OwnedWriteHalf,
    ) -> FollowerId {
        let mut followers = self.followers.lock().await;
        let id = self.next_follower_id.fetch_add(1, Ordering::Relaxed);
        let offset = self.offset();
        let (sender, receiver) = mpsc::channel(FOLLOWER_QUEUE_DEPTH);

        let fullresync = Resp::SimpleString(format!("FULLRESYNC {} {offset}", self.replication_id));
        let snapshot = resp::encode_snapshot(&Rdb::empty().encode());
        // An empty queue always has room for these two.
        let _ = sender.try_send(Bytes::from(fullresync.encode()));
        let _ = sender.try_send(Bytes::from(snapshot));

        tokio::spawn(forward_to_follower(self.clone(), id, receiver, writer));
        followers.insert(
            id,
            FollowerHandle {
                addr,
                listening_port,
                sender,
                acked_offset: offset,
            },
        );
        info!(follower = id, %addr, ?listening_port, offset, "follower registered");
        id
    }

    pub async fn remove_follower(&self, id: FollowerId) {
        if let Some(follower) = self.followers.lock().await.remove(&id) {
            info!(follower = id, addr = %follower.addr, "follower removed");
        }
    }

    pub async fn record_ack(&self, id: FollowerId, offset: u64) {
        if let Some(follower) = self.followers.lock().await.get_mut(&id) {
            debug!(follower = id, offset, "ack");
            follower.acked_offset = follower.acked_offset.max(offset);
        }
        self.acks.send_replace(());
    }

    /// Waits until `replicas` followers have acknowledged the offset current at
    /// the time of the call, or until `timeout` passes (zero waits forever).
    /// Returns how many followers got there.
    pub async fn wait_for_acks(&self, replicas: usize, timeout: Duration) -> usize {
        let target = self.offset();
        let mut acks = self.acks.subscribe();
        let (caught_up, total) = self.caught_up(target).await;
        if caught_up >= replicas || total == 0 {
            return caught_up;
        }

        let getack: Resp = Command::ReplConf(ReplConf::GetAck).into();
        match self.begin_write().await {
            Some(propagation) => propagation.propagate(Bytes::from(getack.encode())),
            None => return caught_up,
        }

        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let changed = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, acks.changed())
                    .await
                    .is_ok_and(|changed| changed.is_ok()),
                None => acks.changed().await.is_ok(),
            };
            let (caught_up, _) = self.caught_up(target).await;
            if caught_up >= replicas || !changed {
                return caught_up;
            }
        }
    }

    async fn caught_up(&self, target: u64) -> (usize, usize) {
        let followers = self.followers.lock().await;
        let caught_up = followers
            .values()
            .filter(|follower| follower.acked_offset >= target)
            .count();
        (caught_up, followers.len())
    }

    /// Switches to following `host:port`, replacing any previous leader link.
    /// Followers attached to this instance are dropped.
    pub async fn follow(&self, host: String, port: u16, replica: Replica) {
        let mut role = self.role.write().await;
        if let Role::Follower { link, .. } = &*role {
            link.abort();
        }
        self.followers.lock().await.clear();
        self.link_up.store(false, Ordering::SeqCst);

        let link = tokio::spawn(replica.run()).abort_handle();
        info!(%host, port, "replicating from leader");
        *role = Role::Follower { host, port, link };
    }

    /// Stops following and serves writes again. Data is kept.
    pub async fn promote(&self) {
        let mut role = self.role.write().await;
        if let Role::Follower { link, host, port } = &*role {
            link.abort();
            info!(%host, port, "detached from leader");
        }
        self.link_up.store(false, Ordering::SeqCst);
        *role = Role::Leader;
    }

    pub(crate) fn reset_offset(&self, baseline: u64) {
        self.offset.store(baseline, Ordering::SeqCst);
    }

    pub(crate) fn advance_offset(&self, consumed: u64) -> u64 {
        self.offset.fetch_add(consumed, Ordering::SeqCst) + consumed
    }

    pub(crate) fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    /// The replication section of `INFO`.
    pub async fn info(&self) -> String {
        let mut lines = vec!["# Replication".to_string()];
        match &*self.role.read().await {
            Role::Leader => {
                lines.push("role:master".to_string());
                let followers = self.followers.lock().await;
                lines.push(format!("connected_slaves:{}", followers.len()));
                for (i, follower) in followers.values().enumerate() {
                    lines.push(format!(
                        "slave{i}:ip={},port={},offset={}",
                        follower.addr.ip(),
                        follower.listening_port.unwrap_or(0),
                        follower.acked_offset
                    ));
                }
            }
            Role::Follower { host, port, .. } => {
                let status = if self.link_up.load(Ordering::SeqCst) {
                    "up"
                } else {
                    "down"
                };
                lines.push("role:slave".to_string());
                lines.push(format!("master_host:{host}"));
                lines.push(format!("master_port:{port}"));
                lines.push(format!("master_link_status:{status}"));
            }
        }
        lines.push(format!("master_replid:{}", self.replication_id));
        lines.push(format!("master_repl_offset:{}", self.offset()));
        lines.join("\r\n")
    }
}

/// Exclusive access to the follower registry for the duration of one write.
pub struct Propagation<'a> {
    offset: &'a AtomicU64,
    _role: RwLockReadGuard<'a, Role>,
    followers: MutexGuard<'a, Followers>,
}

impl Propagation<'_> {
    /// Queues `frame` for every follower and advances the offset by its length.
    /// A follower whose queue is full or closed is dropped.
    pub fn propagate(mut self, frame: Bytes) {
        self.offset.fetch_add(frame.len() as u64, Ordering::SeqCst);
        self.followers
            .retain(|id, follower| match follower.sender.try_send(frame.clone()) {
                Ok(()) => true,
                Err(err) => {
                    warn!(follower = id, addr = %follower.addr, "dropping follower: {err}");
                    false
                }
            });
    }
}

async fn forward_to_follower(
    replication: Arc<Replication>,
    id: FollowerId,
    mut receiver: mpsc::Receiver<Bytes>,
    mut writer: OwnedWriteHalf,
) {
    while let Some(frame) = receiver.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            warn!(follower = id, "write to follower failed: {err}");
            break;
        }
    }
    replication.remove_follower(id).await;
    let _ = writer.shutdown().await;
}
