use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a scheduled [TimerTask].
#[cfg_attr(test, automock)]
pub trait TimerHandle: Send + Sync {
    /// Returns `true` if the task was prevented from running, and `false` if it already fired
    ///  (or was cancelled before). Cancelling a task that already fired is a regular outcome,
    ///  not an error.
    fn cancel(&self) -> bool;
}

/// Schedules a task to run once after a delay. This is the abstraction the retransmission logic
///  is written against, so tests can take control of time and of the interleaving of timer
///  callbacks with other events.
pub trait TimerSource: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle>;
}


const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// [TimerSource] based on tokio's timer wheel: every scheduled task is a spawned tokio task
///  that sleeps for the delay. This must be used from inside a tokio runtime.
#[derive(Default)]
pub struct TokioTimerSource {}

impl TimerSource for TokioTimerSource {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        let state = Arc::new(AtomicU8::new(PENDING));

        let task_state = state.clone();
        let join_handle = tokio::spawn(async move {
            time::sleep(delay).await;

            // whoever moves the state away from PENDING first wins: the timer, or cancel()
            if task_state.compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                task.await;
            }
            else {
                trace!("timer fired after cancellation - skipping task");
            }
        });

        Box::new(TokioTimerHandle {
            state,
            join_handle,
        })
    }
}

struct TokioTimerHandle {
    state: Arc<AtomicU8>,
    join_handle: JoinHandle<()>,
}

impl TimerHandle for TokioTimerHandle {
    fn cancel(&self) -> bool {
        match self.state.compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // the task has not started running its payload, so aborting it is safe
                self.join_handle.abort();
                true
            }
            Err(_) => false,
        }
    }
}
