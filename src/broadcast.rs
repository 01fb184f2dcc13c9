//! Frame broadcast: one producer, many viewers, at-most-once delivery.
//!
//! Each registered consumer owns a pending flag and a condvar. `publish`
//! raises every consumer's flag and stores the frame in a shared
//! latest-frame slot; a consumer's `wait` blocks until its flag is up,
//! takes the latest frame, and lowers the flag with `acknowledge`. A
//! consumer therefore sees each frame at most once and always sees the
//! newest frame, never a backlog.
//!
//! Consumers that stop acknowledging (a wedged HTTP connection, a browser
//! tab left behind) are garbage collected: if a consumer's flag has been
//! up longer than the staleness window when a publish comes around, it is
//! deregistered. At most one consumer is evicted per publish, the one
//! idle the longest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

const DEFAULT_STALENESS: Duration = Duration::from_secs(5);

/// A published frame: JPEG bytes plus sequence number and capture time.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub seq: u64,
    pub timestamp: SystemTime,
}

struct Registration {
    pending: Mutex<PendingState>,
    cv: Condvar,
}

struct PendingState {
    raised: bool,
    /// When the flag was last raised; eviction measures idleness from here.
    raised_at: Instant,
}

struct Inner {
    consumers: Mutex<HashMap<u64, Arc<Registration>>>,
    latest: Mutex<Option<Arc<EncodedFrame>>>,
    staleness: Duration,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

/// Shared broadcast hub. Clone-cheap handle.
#[derive(Clone)]
pub struct FrameBroadcaster {
    inner: Arc<Inner>,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self::with_staleness(DEFAULT_STALENESS)
    }

    /// Staleness window override, used by tests to evict quickly.
    pub fn with_staleness(staleness: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                consumers: Mutex::new(HashMap::new()),
                latest: Mutex::new(None),
                staleness,
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Register a viewer. The handle deregisters itself on drop.
    pub fn register(&self) -> Consumer {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            pending: Mutex::new(PendingState {
                raised: false,
                raised_at: Instant::now(),
            }),
            cv: Condvar::new(),
        });
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, registration.clone());
        Consumer {
            inner: self.inner.clone(),
            registration,
            id,
        }
    }

    /// Publish a frame to every registered consumer and evict at most one
    /// stale consumer.
    pub fn publish(&self, jpeg: Vec<u8>, timestamp: SystemTime) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(EncodedFrame {
            jpeg,
            seq,
            timestamp,
        });
        *self
            .inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(frame);

        let now = Instant::now();
        let mut evict: Option<(u64, Instant)> = None;
        let mut consumers = self
            .inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (&id, registration) in consumers.iter() {
            let mut pending = registration
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !pending.raised {
                pending.raised = true;
                pending.raised_at = now;
                registration.cv.notify_one();
            } else if now.duration_since(pending.raised_at) > self.inner.staleness {
                // Flag still up from an earlier publish: candidate.
                match evict {
                    Some((_, oldest)) if oldest <= pending.raised_at => {}
                    _ => evict = Some((id, pending.raised_at)),
                }
            }
        }
        if let Some((id, _)) = evict {
            consumers.remove(&id);
            log::warn!("FrameBroadcaster: evicted stale consumer {}", id);
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Most recently published frame, if any.
    pub fn latest(&self) -> Option<Arc<EncodedFrame>> {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// One viewer's registration. `wait` then `acknowledge`, repeatedly.
pub struct Consumer {
    inner: Arc<Inner>,
    registration: Arc<Registration>,
    id: u64,
}

impl Consumer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until a fresh frame is pending, or the timeout passes.
    /// Returns `None` on timeout or if the consumer was evicted while
    /// waiting and no frame arrived.
    pub fn wait(&self, timeout: Duration) -> Option<Arc<EncodedFrame>> {
        let deadline = Instant::now() + timeout;
        let mut pending = self
            .registration
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !pending.raised {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self
                .registration
                .cv
                .wait_timeout(pending, remaining)
                .unwrap_or_else(|e| e.into_inner());
            pending = guard;
            if result.timed_out() && !pending.raised {
                return None;
            }
        }
        drop(pending);
        self.inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Lower the pending flag after consuming a frame. Skipping this
    /// eventually gets the consumer evicted.
    pub fn acknowledge(&self) {
        let mut pending = self
            .registration
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.raised = false;
    }

    /// Whether this consumer is still registered with the hub.
    pub fn is_registered(&self) -> bool {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&self.id)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
