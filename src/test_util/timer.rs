use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::reliability::timer::{TimerHandle, TimerSource, TimerTask};

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// [TimerSource] that never fires on its own: tests fire scheduled tasks explicitly, which gives
///  them control over the interleaving of timer callbacks with other events.
#[derive(Default, Clone)]
pub struct ManualTimerSource {
    scheduled: Arc<Mutex<Vec<ScheduledTask>>>,
}

struct ScheduledTask {
    delay: Duration,
    task: Option<TimerTask>,
    state: Arc<AtomicU8>,
}

impl ManualTimerSource {
    pub fn new() -> ManualTimerSource {
        Default::default()
    }

    fn scheduled(&self) -> MutexGuard<'_, Vec<ScheduledTask>> {
        // a test that panicked while holding the lock does not leave inconsistent data behind
        self.scheduled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The delays of all tasks that were neither fired nor cancelled, in scheduling order
    pub fn pending(&self) -> Vec<Duration> {
        self.scheduled().iter()
            .filter(|s| s.state.load(Ordering::Acquire) == PENDING)
            .map(|s| s.delay)
            .collect()
    }

    /// The delays of all tasks ever scheduled, in scheduling order
    pub fn all_delays(&self) -> Vec<Duration> {
        self.scheduled().iter()
            .map(|s| s.delay)
            .collect()
    }

    pub fn num_cancelled(&self) -> usize {
        self.scheduled().iter()
            .filter(|s| s.state.load(Ordering::Acquire) == CANCELLED)
            .count()
    }

    /// Mark the oldest pending task as fired and hand it out without running it. Cancelling it
    ///  afterwards fails, just like for a real timer whose callback is already running.
    pub fn take_next(&self) -> Option<(Duration, TimerTask)> {
        let mut scheduled = self.scheduled();
        for s in scheduled.iter_mut() {
            if s.state.compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                if let Some(task) = s.task.take() {
                    return Some((s.delay, task));
                }
            }
        }
        None
    }

    /// Fire the oldest pending task, returning its delay
    pub async fn fire_next(&self) -> Option<Duration> {
        let (delay, task) = self.take_next()?;
        task.await;
        Some(delay)
    }
}

impl TimerSource for ManualTimerSource {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Box<dyn TimerHandle> {
        let state = Arc::new(AtomicU8::new(PENDING));
        self.scheduled().push(ScheduledTask {
            delay,
            task: Some(task),
            state: state.clone(),
        });
        Box::new(ManualTimerHandle { state })
    }
}

struct ManualTimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle for ManualTimerHandle {
    fn cancel(&self) -> bool {
        self.state.compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use super::*;

    fn flagging_task(flag: Arc<AtomicBool>) -> TimerTask {
        Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_fire_in_order() {
        let timer = ManualTimerSource::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));

        let _h1 = timer.schedule(Duration::from_secs(2), flagging_task(first.clone()));
        let _h2 = timer.schedule(Duration::from_secs(1), flagging_task(second.clone()));
        assert_eq!(timer.pending(), vec![Duration::from_secs(2), Duration::from_secs(1)]);

        assert_eq!(timer.fire_next().await, Some(Duration::from_secs(2)));
        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));

        assert_eq!(timer.fire_next().await, Some(Duration::from_secs(1)));
        assert!(second.load(Ordering::SeqCst));
        assert_eq!(timer.fire_next().await, None);
    }

    #[tokio::test]
    async fn test_cancel() {
        let timer = ManualTimerSource::new();
        let flag = Arc::new(AtomicBool::new(false));

        let handle = timer.schedule(Duration::from_secs(2), flagging_task(flag.clone()));
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(timer.num_cancelled(), 1);

        assert!(timer.pending().is_empty());
        assert_eq!(timer.fire_next().await, None);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_after_take() {
        let timer = ManualTimerSource::new();
        let handle = timer.schedule(Duration::from_secs(2), Box::pin(async {}));

        let (delay, _task) = timer.take_next().unwrap();
        assert_eq!(delay, Duration::from_secs(2));
        assert!(!handle.cancel());
    }
}
