//! Session Pool: an indexed, time-ordered collection with background expiry
//! (§3, §4.3).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SockJsError};
use crate::session::{Session, SessionState};

/// Default cadence of the background GC pass.
pub const DEFAULT_GC_CYCLE_SECS: u64 = 10;

/// One entry on the time-ordered heap: `(last_checked, session_id)`.
/// `Ord` is derived from the tuple, giving a pure min-heap on `checked_at`
/// once wrapped in [`Reverse`] (ties broken by id, just to make the order
/// total and deterministic in tests).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
struct HeapEntry {
    checked_at: Instant,
    session_id: String,
}

/// A garbage-collected collection of live [`Session`]s, indexed by id.
///
/// Mirrors the session pool in most SockJS server implementations: a map for
/// O(1) lookup by id, and a min-heap keyed by "last checked" time that the
/// GC cycle sweeps to find expired entries without needing to scan the
/// whole map every pass.
pub struct SessionPool {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    /// Per-id stamp of the last GC cycle that touched this session. Doubles
    /// as the heap's de-duplication key: a session is only ever present once
    /// at a time because the GC only re-enqueues immediately after popping.
    cycles: Mutex<HashMap<String, Instant>>,
    gc_cycle: Duration,
    gc_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopping: std::sync::atomic::AtomicBool,
}

impl SessionPool {
    pub fn new(gc_cycle: Duration) -> Arc<Self> {
        Arc::new(SessionPool {
            sessions: RwLock::new(HashMap::new()),
            heap: Mutex::new(BinaryHeap::new()),
            cycles: Mutex::new(HashMap::new()),
            gc_cycle,
            gc_task: Mutex::new(None),
            stopping: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a freshly created `new` session. Fails if the id is already
    /// present, or the session has already transitioned out of `new`.
    pub fn add(&self, session: Arc<Session>) -> Result<()> {
        if self.stopping.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SockJsError::EndpointStopped);
        }

        let id = session.id().to_string();
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) || !session.is_new() {
            return Err(SockJsError::DuplicateSession(id));
        }

        let now = Instant::now();
        self.cycles.lock().insert(id.clone(), now);
        self.heap.lock().push(Reverse(HeapEntry {
            checked_at: now,
            session_id: id.clone(),
        }));
        sessions.insert(id.clone(), session);
        tracing::debug!(session_id = %id, total = sessions.len(), "session added to pool");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session by id. If it was open, interrupt it first. Returns
    /// whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        let Some(session) = removed else {
            return false;
        };

        self.cycles.lock().remove(id);
        // The heap entry is left in place; gc() discards it when it notices
        // the id is no longer a key in `cycles`/`sessions`.

        if session.is_open() {
            session.interrupt();
        }

        tracing::debug!(session_id = %id, "session removed from pool");
        true
    }

    /// One GC sweep at wall-clock `now`.
    ///
    /// Repeatedly peeks the heap head: if its recorded cycle stamp is
    /// already `>= now`, every live entry has been visited this pass and we
    /// stop. Otherwise pop it; an expired session is removed, a live one is
    /// restamped with `now` and pushed back. Because the ordering key is
    /// "last checked", concurrent adds/removes interleave safely — new
    /// entries always sort before the running cycle until visited.
    pub fn gc(&self, now: Instant) {
        loop {
            let head_id = {
                let heap = self.heap.lock();
                match heap.peek() {
                    Some(Reverse(entry)) => entry.session_id.clone(),
                    None => return,
                }
            };

            let cycle_stamp = self.cycles.lock().get(&head_id).copied();
            let Some(cycle_stamp) = cycle_stamp else {
                // Already removed between peek and here (or a stale entry
                // left behind by `remove`) — pop and discard it.
                self.heap.lock().pop();
                continue;
            };

            if cycle_stamp >= now {
                break;
            }

            self.heap.lock().pop();

            let Some(session) = self.get(&head_id) else {
                self.cycles.lock().remove(&head_id);
                continue;
            };

            if session.has_expired(now) {
                self.remove(&head_id);
                continue;
            }

            self.cycles.lock().insert(head_id.clone(), now);
            self.heap.lock().push(Reverse(HeapEntry {
                checked_at: now,
                session_id: head_id,
            }));
        }
    }

    /// Launch the background GC task on `gc_cycle` cadence. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.gc_task.lock();
        if task.is_some() {
            return;
        }

        let pool = self.clone();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(pool.gc_cycle).await;
                pool.gc(Instant::now());
            }
        }));
    }

    /// Cancel the GC task and interrupt every remaining open session.
    pub fn stop(&self) {
        self.stopping
            .store(true, std::sync::atomic::Ordering::SeqCst);

        if let Some(handle) = self.gc_task.lock().take() {
            handle.abort();
        }

        self.drain();
    }

    /// Interrupt every open session without cancelling the GC task.
    pub fn drain(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }
}
