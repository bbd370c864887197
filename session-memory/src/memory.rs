use crate::persisted::Persisted;
use ldm7_types::{FeedSpec, ProdIndex, Signature};
use product_queue::ProdIndexQueue;
use std::{
    io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum SessionMemoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed session memory at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn path_for(logdir: &Path, server_spec: &str, feed: FeedSpec) -> PathBuf {
    logdir.join(format!("{server_spec}_{}.yaml", feed.as_key()))
}

/// Persisted receiver memory for one (server-address, feed) pair (C3).
///
/// All mutators set `dirty`; [`close`](Self::close) is the only place that
/// actually touches disk, and only does so if something changed (§4.3).
pub struct SessionMemory {
    path: PathBuf,
    last_mcast_sig: Mutex<Option<Signature>>,
    missed_q: ProdIndexQueue,
    requested_q: ProdIndexQueue,
    dirty: AtomicBool,
}

impl SessionMemory {
    /// Opens (creating if absent) the memory file for `(server_spec, feed)`
    /// under `logdir`. Every persisted index — whether it was in the
    /// requested or missed queue when the prior session closed — is loaded
    /// into `missed_q`: "requested" is only meaningful within a session
    /// (§4.3 step 3).
    pub fn open(logdir: &Path, server_spec: &str, feed: FeedSpec) -> Result<Self, SessionMemoryError> {
        let path = path_for(logdir, server_spec, feed);
        let missed_q = ProdIndexQueue::new();
        let mut last_mcast_sig = None;

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let persisted: Persisted =
                    serde_yaml::from_str(&contents).map_err(|source| SessionMemoryError::Malformed { path: path.clone(), source })?;
                if let Some(hex) = persisted.last_multicast_product_signature {
                    if let Ok(sig) = Signature::from_str(&hex) {
                        last_mcast_sig = Some(sig);
                    } else {
                        tracing::warn!(path = %path.display(), "ignoring unparsable last-multicast signature");
                    }
                }
                for i in persisted.missed_multicast_file_identifiers {
                    let _ = missed_q.add(ProdIndex(i));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(SessionMemoryError::Io { path, source }),
        }

        Ok(Self {
            path,
            last_mcast_sig: Mutex::new(last_mcast_sig),
            missed_q,
            requested_q: ProdIndexQueue::new(),
            dirty: AtomicBool::new(false),
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn set_last_mcast_sig(&self, sig: Signature) {
        *self.last_mcast_sig.lock().unwrap() = Some(sig);
        self.mark_dirty();
    }

    pub fn get_last_mcast_sig(&self) -> Option<Signature> {
        *self.last_mcast_sig.lock().unwrap()
    }

    pub fn add_missed(&self, i: ProdIndex) {
        let _ = self.missed_q.add(i);
        self.mark_dirty();
    }

    pub fn add_requested(&self, i: ProdIndex) {
        let _ = self.requested_q.add(i);
        self.mark_dirty();
    }

    pub async fn peek_missed_wait(&self) -> Option<ProdIndex> {
        self.missed_q.peek_wait().await
    }

    pub fn remove_missed_nowait(&self) -> Option<ProdIndex> {
        let r = self.missed_q.remove_nowait();
        if r.is_some() {
            self.mark_dirty();
        }
        r
    }

    pub fn peek_requested_nowait(&self) -> Option<ProdIndex> {
        self.requested_q.peek_nowait()
    }

    pub fn remove_requested_nowait(&self) -> Option<ProdIndex> {
        let r = self.requested_q.remove_nowait();
        if r.is_some() {
            self.mark_dirty();
        }
        r
    }

    pub fn shutdown_missed(&self) {
        self.missed_q.shutdown();
    }

    pub fn clear_all_missed(&self) {
        self.missed_q.clear();
        self.mark_dirty();
    }

    /// Tries `requested_q` first, then `missed_q`; used when a session
    /// tears down and wants to know whether there is anything left to
    /// preserve without caring which queue it came from.
    pub fn get_any_missed_nowait(&self) -> Option<ProdIndex> {
        self.requested_q.peek_nowait().or_else(|| self.missed_q.peek_nowait())
    }

    pub fn missed_queue(&self) -> &ProdIndexQueue {
        &self.missed_q
    }

    pub fn requested_queue(&self) -> &ProdIndexQueue {
        &self.requested_q
    }

    /// Emits the combined state to disk if anything changed, atomically
    /// (write `.new`, fsync, rename). A failed close leaves the previous
    /// canonical file untouched; the `.new` file may linger and is ignored
    /// by `open`.
    pub fn close(&self) -> Result<(), SessionMemoryError> {
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }

        // I3: requested first, then missed, so the next session re-requests
        // them in the order they were originally asked for.
        let mut combined = self.requested_q.snapshot();
        combined.extend(self.missed_q.snapshot());

        let persisted = Persisted {
            last_multicast_product_signature: self.get_last_mcast_sig().map(|s| s.to_string()),
            missed_multicast_file_identifiers: combined.into_iter().map(u32::from).collect(),
        };
        let yaml = serde_yaml::to_string(&persisted).expect("session memory always serializes");

        let tmp_path = self.path.with_extension("yaml.new");
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(|source| SessionMemoryError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            use std::io::Write;
            file.write_all(yaml.as_bytes()).map_err(|source| SessionMemoryError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            file.sync_all().map_err(|source| SessionMemoryError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|source| SessionMemoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_missed_and_requested_as_a_single_list() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FeedSpec::from_bits(1);
        {
            let mem = SessionMemory::open(dir.path(), "host:1", feed).unwrap();
            mem.add_requested(ProdIndex(7));
            mem.add_missed(ProdIndex(9));
            mem.set_last_mcast_sig(Signature::from([3u8; 16]));
            mem.close().unwrap();
        }
        let mem = SessionMemory::open(dir.path(), "host:1", feed).unwrap();
        assert_eq!(mem.get_last_mcast_sig(), Some(Signature::from([3u8; 16])));
        // P3: union of missed ∪ requested is preserved, all re-classed as missed.
        let mut seen = vec![];
        while let Some(i) = mem.remove_missed_nowait() {
            seen.push(i);
        }
        seen.sort_by_key(|i| i.0);
        assert_eq!(seen, vec![ProdIndex(7), ProdIndex(9)]);
        assert_eq!(mem.remove_requested_nowait(), None);
    }

    #[test]
    fn clean_close_with_nothing_dirty_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FeedSpec::from_bits(2);
        let mem = SessionMemory::open(dir.path(), "host:2", feed).unwrap();
        mem.close().unwrap();
        let path = path_for(dir.path(), "host:2", feed);
        assert!(!path.exists());
    }

    #[test]
    fn get_any_missed_prefers_requested_then_missed() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FeedSpec::from_bits(3);
        let mem = SessionMemory::open(dir.path(), "host:3", feed).unwrap();
        mem.add_missed(ProdIndex(1));
        assert_eq!(mem.get_any_missed_nowait(), Some(ProdIndex(1)));
        mem.add_requested(ProdIndex(2));
        assert_eq!(mem.get_any_missed_nowait(), Some(ProdIndex(2)));
    }

    #[test]
    fn tolerates_missing_file_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let mem = SessionMemory::open(dir.path(), "host:4", FeedSpec::from_bits(4)).unwrap();
        assert_eq!(mem.get_last_mcast_sig(), None);
    }
}
