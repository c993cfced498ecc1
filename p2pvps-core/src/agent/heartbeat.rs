use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::debug;

/// Cancellable recurring timer for lease expiration checks.
///
/// Ticks are delivered through a single-slot channel: a tick that fires while
/// the previous one is still being handled is coalesced, never queued twice.
/// The timer stops when [`disarm`](Self::disarm) consumes it or when it is
/// dropped.
pub struct ExpirationTimer {
    ticks: mpsc::Receiver<()>,
    task: JoinHandle<()>,
    period: Duration,
}

impl ExpirationTimer {
    /// Start ticking every `period`. The first tick fires one period from now.
    pub fn arm(period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match tx.try_send(()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(())) => {
                        debug!("expiration tick coalesced, previous check still pending");
                    }
                    Err(TrySendError::Closed(())) => break,
                }
            }
        });
        debug!(period_secs = period.as_secs_f64(), "expiration timer armed");
        Self { ticks: rx, task, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick. Returns `false` if the timer task has died.
    pub async fn tick(&mut self) -> bool {
        self.ticks.recv().await.is_some()
    }

    pub fn disarm(self) {
        debug!("expiration timer disarmed");
    }

    /// Kill the ticking task while keeping the handle, as a crash would.
    #[cfg(test)]
    pub(crate) fn kill_task(&self) {
        self.task.abort();
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let start = Instant::now();
        let mut timer = ExpirationTimer::arm(Duration::from_secs(120));
        assert!(timer.tick().await);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_sees_coalesced_ticks() {
        let mut timer = ExpirationTimer::arm(Duration::from_secs(1));
        assert!(timer.tick().await);

        // About ten periods pass while a "check" is in flight.
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        // Only one tick was buffered; the next one comes on the original schedule.
        assert!(timer.tick().await);
        let before = Instant::now();
        assert!(timer.tick().await);
        assert!(before.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn dead_task_reports_no_tick() {
        let mut timer = ExpirationTimer::arm(Duration::from_secs(1));
        timer.kill_task();
        assert!(!timer.tick().await);
        assert_eq!(timer.period(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_stops_the_task() {
        let timer = ExpirationTimer::arm(Duration::from_secs(1));
        let handle = timer.task.abort_handle();
        timer.disarm();
        for _ in 0..10 {
            if handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
    }
}
