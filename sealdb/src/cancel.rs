//! Cooperative cancellation for blocking waits.
//!
//! A [`CancellationToken`] interrupts the two places the library blocks on
//! its own: waiting for a pool lease and sleeping between busy retries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

type Listener = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

/// A cloneable flag that wakes blocked operations when set.
///
/// Clones share state: cancelling any clone cancels all of them.
/// Cancellation is permanent.
///
/// # Examples
///
/// ```
/// use sealdb::CancellationToken;
/// use std::time::Duration;
///
/// let token = CancellationToken::new();
/// assert!(token.sleep(Duration::from_millis(1)));
///
/// token.clone().cancel();
/// assert!(token.is_cancelled());
/// assert!(!token.sleep(Duration::from_secs(60)));
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Cancels the token and wakes everything waiting on it.
    pub fn cancel(&self) {
        {
            let mut cancelled = self
                .inner
                .cancelled
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *cancelled {
                return;
            }
            *cancelled = true;
        }
        self.inner.wake.notify_all();

        // Listeners may take other locks; call them with ours released.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the token
    /// was (or became) cancelled.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = self
            .inner
            .wake
            .wait_timeout_while(cancelled, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*cancelled
    }

    /// Registers `listener` to run on cancellation until the guard drops.
    ///
    /// The listener does not run if the token is already cancelled; callers
    /// check [`is_cancelled`](Self::is_cancelled) after registering.
    pub(crate) fn register(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        ListenerGuard {
            token: self.clone(),
            id,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Removes a cancellation listener when dropped.
pub(crate) struct ListenerGuard {
    token: CancellationToken,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.token
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}
