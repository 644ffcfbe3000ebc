//! Session manager (§4.5.2): reference-counted leases over a Model Runtime,
//! an idle-unload background task, and a cancellation/timeout race on every
//! active session — grounded on the teacher's `Drop`-based resource
//! discipline (used elsewhere for transaction guards), generalised to a
//! session lease instead of a SQL transaction.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::QmdError;

/// The only permitted mutators of the runtime's in-flight/active counters
/// (§5): everything else reads them through `can_unload`.
#[derive(Default)]
struct Counters {
    active_sessions: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Counters {
    fn can_unload(&self) -> bool {
        self.active_sessions.load(Ordering::SeqCst) == 0 && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

pub struct SessionManager {
    counters: Arc<Counters>,
    idle_unload_secs: u64,
    shutdown: Arc<Notify>,
}

impl SessionManager {
    pub fn new(idle_unload_secs: u64) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            idle_unload_secs,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Acquire a session lease, run `body`, and always release — even on
    /// cancellation, timeout, or panic unwind (the `Drop` guard releases
    /// unconditionally).
    pub async fn with_session<F, Fut, T>(
        &self,
        max_duration: Option<Duration>,
        cancel_token: Option<CancellationToken>,
        body: F,
    ) -> Result<T, QmdError>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        self.counters.active_sessions.fetch_add(1, Ordering::SeqCst);
        let _guard = SessionGuard {
            counters: self.counters.clone(),
        };

        let handle = SessionHandle {
            counters: self.counters.clone(),
        };

        let work = body(handle);
        tokio::pin!(work);

        let cancel = cancel_token.unwrap_or_default();
        let timeout = async {
            match max_duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        tokio::select! {
            result = &mut work => Ok(result),
            _ = cancel.cancelled() => Err(QmdError::CancelledExpired),
            _ = &mut timeout => Err(QmdError::CancelledExpired),
        }
    }

    /// Spawn the idle-unload background task. Each tick calls `can_unload`
    /// before touching any native resource; `on_unload` performs the actual
    /// disposal of per-context resources (not the models themselves, unless
    /// `aggressive_reclaim` is set by the caller's `on_unload`).
    pub fn spawn_idle_unload<F, Fut>(self: &Arc<Self>, on_unload: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let counters = self.counters.clone();
        let interval_secs = self.idle_unload_secs.max(1);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut idle_ticks = 0u64;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {},
                    _ = shutdown.notified() => break,
                }

                if counters.can_unload() {
                    idle_ticks += 1;
                    if idle_ticks == 1 {
                        on_unload().await;
                    }
                } else {
                    idle_ticks = 0;
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn active_sessions(&self) -> usize {
        self.counters.active_sessions.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }
}

struct SessionGuard {
    counters: Arc<Counters>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counters.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle passed into a session's body; increments/decrements `in_flight`
/// around each model call via [`SessionHandle::track`].
pub struct SessionHandle {
    counters: Arc<Counters>,
}

impl SessionHandle {
    pub async fn track<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = op().await;
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
