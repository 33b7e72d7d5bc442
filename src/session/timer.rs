//! Elapsed-time counter
//!
//! Counts whole seconds while a recording runs. The count survives `halt` so
//! the preview can still show how long the recording was; only `reset` (or the
//! next `start`) sets it back to zero.

use super::state::SessionEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_secs(1);

pub struct ElapsedTimer {
    seconds: Arc<AtomicU64>,
    halted: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ElapsedTimer {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(0)),
            halted: Arc::new(AtomicBool::new(true)),
            task: None,
            events,
        }
    }

    /// Reset to zero and tick once per second. Must be called inside a Tokio
    /// runtime.
    pub fn start(&mut self) {
        self.halt();
        self.seconds.store(0, Ordering::SeqCst);

        let halted = Arc::new(AtomicBool::new(false));
        self.halted = Arc::clone(&halted);
        let seconds = Arc::clone(&self.seconds);
        let events = self.events.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);
            loop {
                ticker.tick().await;
                if halted.load(Ordering::Acquire) {
                    break;
                }
                let now = seconds.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = events.send(SessionEvent::Elapsed { seconds: now });
            }
        }));
    }

    /// Stop ticking, keeping the count
    pub fn halt(&mut self) {
        self.halted.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Stop ticking and go back to zero
    pub fn reset(&mut self) {
        self.halt();
        self.seconds.store(0, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Render seconds as `MM:SS`, or `H:MM:SS` from one hour on
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (ElapsedTimer, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (ElapsedTimer::new(tx), rx)
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(75), "01:15");
        assert_eq!(format_elapsed(3599), "59:59");
        assert_eq!(format_elapsed(3661), "1:01:01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_second() {
        let (mut timer, mut rx) = timer();
        timer.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(timer.elapsed(), 3);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Elapsed { seconds: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_keeps_count_and_reset_clears_it() {
        let (mut timer, _rx) = timer();
        timer.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        timer.halt();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(timer.elapsed(), 2);
        assert!(!timer.is_running());

        timer.reset();
        assert_eq!(timer.elapsed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_to_zero() {
        let (mut timer, _rx) = timer();
        timer.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        timer.start();
        assert_eq!(timer.elapsed(), 0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(timer.elapsed(), 1);
    }
}
