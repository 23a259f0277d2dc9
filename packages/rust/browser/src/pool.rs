//! Bounded pool of reusable browsing sessions.
//!
//! Admission is a FIFO [`Semaphore`] with one permit per session; idle
//! sessions sit on a stack. A [`SessionLease`] owns both the permit and the
//! session, so exactly one holder can drive a session at a time. Returning a
//! lease (explicitly or by dropping it) resets the session before the permit
//! is released, so the next borrower never sees a previous page or cookie.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, instrument, warn};

use contactscout_shared::{Result, ScoutError};

use crate::session::{BrowserSession, SessionProvider};

/// Upper bound on a single session reset.
const RESET_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed-capacity pool of [`BrowserSession`]s.
///
/// Cloning is cheap; clones share the same sessions.
#[derive(Clone)]
pub struct BrowserSessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn BrowserSession>>>,
    provider: Arc<dyn SessionProvider>,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    lost: AtomicUsize,
}

impl BrowserSessionPool {
    /// Open `capacity` sessions up front.
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        capacity: usize,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(ScoutError::config("session pool capacity must be at least 1"));
        }

        let mut idle = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let session = provider
                .open()
                .map_err(|e| ScoutError::ProviderUnavailable(format!("cannot open session: {e}")))?;
            idle.push(session);
        }
        debug!(capacity, "session pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity,
                acquire_timeout,
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(idle),
                provider,
                in_use: AtomicUsize::new(0),
                peak_in_use: AtomicUsize::new(0),
                lost: AtomicUsize::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Sessions currently lent out.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of sessions lent out at the same time.
    pub fn peak_in_use(&self) -> usize {
        self.inner.peak_in_use.load(Ordering::SeqCst)
    }

    /// Sessions that could be neither reset nor replaced.
    pub fn lost(&self) -> usize {
        self.inner.lost.load(Ordering::SeqCst)
    }

    /// Wait for a free session.
    ///
    /// Waiters are served in arrival order. Fails with
    /// [`ScoutError::PoolExhaustedTimeout`] after the configured wait, or
    /// [`ScoutError::ProviderUnavailable`] once every session has been lost.
    #[instrument(skip_all)]
    pub async fn acquire(&self) -> Result<SessionLease> {
        let inner = &self.inner;
        if inner.lost.load(Ordering::SeqCst) >= inner.capacity {
            return Err(ScoutError::ProviderUnavailable(
                "every pooled session has failed".into(),
            ));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            inner.acquire_timeout,
            inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ScoutError::ProviderUnavailable(
                    "every pooled session has failed".into(),
                ));
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, "session pool exhausted");
                return Err(ScoutError::PoolExhaustedTimeout { waited_ms });
            }
        };

        let session = match inner.pop_idle() {
            Some(session) => session,
            // A permit without an idle session only happens if a replacement
            // was lost between check-in and here; open one on demand.
            None => inner.provider.open().map_err(|e| {
                ScoutError::ProviderUnavailable(format!("cannot open session: {e}"))
            })?,
        };

        let now = inner.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_use.fetch_max(now, Ordering::SeqCst);
        debug!(
            in_use = now,
            waited_ms = started.elapsed().as_millis() as u64,
            "session acquired"
        );

        Ok(SessionLease {
            session: Some(session),
            permit: Some(permit),
            pool: inner.clone(),
        })
    }
}

impl PoolInner {
    fn pop_idle(&self) -> Option<Box<dyn BrowserSession>> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    fn push_idle(&self, session: Box<dyn BrowserSession>) {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(session);
    }

    /// Reset a returned session and hand its slot back.
    ///
    /// The permit is held until the session is clean, so no borrower can
    /// observe a half-reset session.
    async fn recycle(&self, mut session: Box<dyn BrowserSession>, permit: OwnedSemaphorePermit) {
        let reason = match tokio::time::timeout(RESET_TIMEOUT, session.reset()).await {
            Ok(Ok(())) => {
                self.push_idle(session);
                self.in_use.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "reset timed out".to_string(),
        };

        warn!(%reason, "session reset failed, replacing it");
        drop(session);
        self.replace(permit);
    }

    /// Fill a slot whose session could not be cleaned with a fresh one.
    ///
    /// If the provider cannot open a session, the permit is retired and the
    /// slot counts as lost; once every slot is lost the pool closes.
    fn replace(&self, permit: OwnedSemaphorePermit) {
        match self.provider.open() {
            Ok(fresh) => {
                self.push_idle(fresh);
                self.in_use.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }
            Err(e) => {
                self.in_use.fetch_sub(1, Ordering::SeqCst);
                permit.forget();
                let lost = self.lost.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, lost, capacity = self.capacity, "session slot lost");
                if lost >= self.capacity {
                    self.permits.close();
                }
            }
        }
    }
}

/// Exclusive use of one pooled session.
///
/// Derefs to the session. Call [`SessionLease::release`] to return it and
/// wait for the reset; dropping the lease (for example when the owning task
/// is cancelled) schedules the same reset in the background.
pub struct SessionLease {
    session: Option<Box<dyn BrowserSession>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl SessionLease {
    /// Return the session to the pool once it has been reset.
    pub async fn release(mut self) {
        if let (Some(session), Some(permit)) = (self.session.take(), self.permit.take()) {
            self.pool.recycle(session, permit).await;
        }
    }
}

impl Deref for SessionLease {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("lease holds its session until released")
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("lease holds its session until released")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let (Some(session), Some(permit)) = (self.session.take(), self.permit.take()) else {
            return;
        };

        let pool = self.pool.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.recycle(session, permit).await;
                });
            }
            Err(_) => {
                // No runtime to reset on: the session cannot be cleaned, so
                // swap it for a fresh one.
                drop(session);
                pool.replace(permit);
            }
        }
    }
}
