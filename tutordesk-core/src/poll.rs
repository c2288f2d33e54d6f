use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Recurring timer that posts `message` to a channel every `period`.
///
/// The first tick fires one full period after spawning. Stops when the
/// receiver is gone or the task is cancelled; dropping the `PollTask`
/// cancels it.
pub struct PollTask {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

impl PollTask {
    pub fn spawn<T>(name: &'static str, period: Duration, tx: mpsc::UnboundedSender<T>, message: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel_token = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            // A slow tick should not trigger a burst of catch-up polls.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!(poll = name, "Poll task cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if tx.send(message.clone()).is_err() {
                            debug!(poll = name, "Poll receiver gone, stopping");
                            return;
                        }
                    }
                }
            }
        });

        Self { token, _task: task }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_each_period_after_the_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poll = PollTask::spawn("messages", Duration::from_millis(4000), tx, 7u8);

        tokio::time::sleep(Duration::from_millis(3999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().unwrap(), 7);

        tokio::time::sleep(Duration::from_millis(8000)).await;
        assert_eq!(rx.try_recv().unwrap(), 7);
        assert_eq!(rx.try_recv().unwrap(), 7);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_ticking() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poll = PollTask::spawn("messages", Duration::from_millis(100), tx, ());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_ok());

        drop(poll);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }
}
