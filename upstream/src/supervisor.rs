use ldm7_types::{FeedSpec, McastInfo};
use parking_lot::Mutex;
use std::collections::HashMap;

/// What a spawn attempt hands back once the sender has reported its bound
/// multicast group and recovery-server port (§6: "read its bound port
/// from a pipe").
#[derive(Debug, Clone, Copy)]
pub struct SpawnedSender {
    pub pid: u32,
    pub mcast_info: McastInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("I/O error launching multicast sender: {0}")]
    Io(#[from] std::io::Error),
    #[error("multicast sender exited before reporting its bound endpoints")]
    NoHandshake,
}

/// Launches and signals the external multicast-sender process for one
/// feed. The reference design forks and reads the child's stdout pipe for
/// its bound port; that binary and its argument convention are outside
/// this spec's scope; implementations provide whatever `SenderSpawner`
/// actually execs it.
pub trait SenderSpawner: Send + Sync + 'static {
    fn spawn(&self, feed: FeedSpec) -> Result<SpawnedSender, SpawnError>;
    fn is_alive(&self, pid: u32) -> bool;
    fn terminate(&self, pid: u32);
}

/// Type-erased view of [`SenderSupervisor`] so a [`crate::Servant`] can
/// hold one without being generic over the spawner it was built with.
pub trait SenderSupervision: Send + Sync {
    fn ensure_running(&self, feed: FeedSpec) -> Result<(McastInfo, u32), SpawnError>;
    fn terminated(&self, pid: u32);
}

struct Entry {
    pid: u32,
    mcast_info: McastInfo,
}

/// C8: ensures exactly one multicast-sender process exists per feed
/// (P9), tracking `(pid, port)` in a map shared by every servant on this
/// host. The reference implementation forks per downstream connection and
/// keeps this map in a POSIX shared-memory segment so sibling processes
/// see the same view (§9 design note: "fork-based supervision with
/// shared-memory PID map"); the redesign this spec calls for replaces
/// per-connection OS processes with in-process tasks talking to a single
/// long-running supervisor, which is exactly what sharing one
/// `Arc<SenderSupervisor<_>>` across servants gives us — no shared memory
/// or IPC socket needed once "servant" no longer means "forked process".
pub struct SenderSupervisor<S: SenderSpawner> {
    spawner: S,
    entries: Mutex<HashMap<FeedSpec, Entry>>,
}

impl<S: SenderSpawner> SenderSupervisor<S> {
    pub fn new(spawner: S) -> Self {
        Self {
            spawner,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: SenderSpawner> SenderSupervision for SenderSupervisor<S> {
    /// Reuses a running, signalable sender for `feed`; otherwise spawns
    /// one. The whole check-then-spawn sequence runs under `entries`'
    /// lock, so two concurrent subscriptions for the same feed can never
    /// race into two senders (P9).
    fn ensure_running(&self, feed: FeedSpec) -> Result<(McastInfo, u32), SpawnError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&feed) {
            if self.spawner.is_alive(entry.pid) {
                return Ok((entry.mcast_info, entry.pid));
            }
            tracing::warn!(pid = entry.pid, %feed, "recorded multicast sender is gone, respawning");
        }
        let spawned = self.spawner.spawn(feed)?;
        entries.insert(
            feed,
            Entry {
                pid: spawned.pid,
                mcast_info: spawned.mcast_info,
            },
        );
        Ok((spawned.mcast_info, spawned.pid))
    }

    /// Called by the top-level LDM when it reaps a child (§4.8).
    fn terminated(&self, pid: u32) {
        self.entries.lock().retain(|_, e| e.pid != pid);
    }
}

impl<S: SenderSpawner> Drop for SenderSupervisor<S> {
    /// Each process that spawned a sender registers an exit handler that
    /// signals that sender (§4.8 "Cleanup").
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            self.spawner.terminate(entry.pid);
        }
    }
}
