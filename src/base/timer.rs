//! One-shot timers driven by a dedicated timer thread.
//!
//! A [`TimerThread`] owns (or borrows) a tokio runtime whose only job is to
//! sleep until deadlines. A [`TimerQueue`] is a fixed duration on that
//! thread; every [`Timer`] created from a queue fires once, `duration` after
//! it was created, unless cancelled first.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Identifier handed to a timer callback so the owner can tell whether the
/// firing timer is still the one it armed.
pub type TimerId = u64;

/// Handle to the thread that runs timer callbacks.
#[derive(Clone)]
pub struct TimerThread {
    handle: Handle,
    shared: Arc<TimerShared>,
    _owner: Option<RuntimeThread>,
}

#[derive(Default)]
struct TimerShared {
    next_id: AtomicU64,
    live: AtomicUsize,
}

/// A current-thread runtime parked on its own named OS thread.
///
/// Callers only hold its [`Handle`]. The runtime is run and dropped on its
/// own thread, which exits when the last clone drops.
#[derive(Clone)]
pub(crate) struct RuntimeThread {
    handle: Handle,
    _shutdown: Arc<Shutdown>,
}

struct Shutdown(parking_lot::Mutex<Option<oneshot::Sender<()>>>);

impl Drop for Shutdown {
    fn drop(&mut self) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl RuntimeThread {
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (tx, rx) = oneshot::channel::<()>();

        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = rx.await;
                });
                tracing::debug!(thread = %thread_name, "runtime thread stopped");
            })?;

        Ok(Self {
            handle,
            _shutdown: Arc::new(Shutdown(parking_lot::Mutex::new(Some(tx)))),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl TimerThread {
    /// Start a dedicated `netpoint-timer` thread running a current-thread
    /// runtime. The thread exits when the last clone of this handle drops.
    pub fn new() -> io::Result<Self> {
        let owner = RuntimeThread::spawn("netpoint-timer")?;
        Ok(Self {
            handle: owner.handle().clone(),
            shared: Arc::new(TimerShared::default()),
            _owner: Some(owner),
        })
    }

    /// Run timers on an existing runtime instead of a dedicated thread.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            shared: Arc::new(TimerShared::default()),
            _owner: None,
        }
    }

    /// Create a queue whose timers fire `duration` after creation.
    pub fn queue(&self, duration: Duration) -> TimerQueue {
        TimerQueue {
            duration,
            thread: self.clone(),
        }
    }

    /// Number of timers created on this thread that have neither fired nor
    /// been cancelled.
    pub fn live_timers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerThread")
            .field("dedicated", &self._owner.is_some())
            .field("live_timers", &self.live_timers())
            .finish()
    }
}

/// A fixed timeout on a [`TimerThread`].
#[derive(Clone, Debug)]
pub struct TimerQueue {
    duration: Duration,
    thread: TimerThread,
}

impl TimerQueue {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn thread(&self) -> &TimerThread {
        &self.thread
    }

    /// Same thread, different duration.
    pub fn with_duration(&self, duration: Duration) -> TimerQueue {
        self.thread.queue(duration)
    }

    /// Arm a one-shot timer for this queue's duration.
    pub fn create_timer<F>(&self, callback: F) -> Timer
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        self.create_timer_for(self.duration, callback)
    }

    /// Arm a one-shot timer for an explicit duration on this queue's thread.
    /// `Duration::MAX` arms a timer that never fires.
    pub fn create_timer_for<F>(&self, duration: Duration, callback: F) -> Timer
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        let shared = Arc::clone(&self.thread.shared);
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(AtomicU8::new(PENDING));
        shared.live.fetch_add(1, Ordering::AcqRel);

        let deadline = Instant::now()
            .checked_add(duration)
            .filter(|_| duration != Duration::MAX);
        let task = deadline.map(|deadline| {
            let status = Arc::clone(&status);
            let shared = Arc::clone(&shared);
            self.thread
                .handle
                .spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if status
                        .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        shared.live.fetch_sub(1, Ordering::AcqRel);
                        callback(id);
                    }
                })
                .abort_handle()
        });

        tracing::trace!(timer = id, ?duration, "timer armed");
        Timer {
            id,
            status,
            shared,
            task,
            duration,
        }
    }
}

/// An armed one-shot timer. Dropping it cancels it.
pub struct Timer {
    id: TimerId,
    status: Arc<AtomicU8>,
    shared: Arc<TimerShared>,
    task: Option<AbortHandle>,
    duration: Duration,
}

impl Timer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Cancel the timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .status
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.shared.live.fetch_sub(1, Ordering::AcqRel);
            if let Some(task) = &self.task {
                task.abort();
            }
        }
        cancelled
    }

    pub fn has_expired(&self) -> bool {
        self.status.load(Ordering::Acquire) == FIRED
    }

    pub fn is_pending(&self) -> bool {
        self.status.load(Ordering::Acquire) == PENDING
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("duration", &self.duration)
            .field("pending", &self.is_pending())
            .finish()
    }
}
