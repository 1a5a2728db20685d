//! Sender task
//!
//! Single consumer of the outbound queue. For each message: wait for the
//! network, ensure the session is up, then attempt one bounded delivery.
//! Every failure path re-enqueues the message at the tail and backs off, so
//! nothing is lost to a transient outage; at worst a message is delivered
//! twice when a send times out on the wire but still lands.

use crate::error::DispatchError;
use crate::probe::NetworkProbe;
use crate::queue::{QueueReceiver, QueueSender};
use crate::session::{ConnectionManager, SendOutcome, SessionClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Sleep that wakes early when the running flag clears.
///
/// Returns `false` when shutdown was requested during the wait.
pub(crate) async fn interruptible_sleep(
    running: &mut watch::Receiver<bool>,
    delay: Duration,
) -> bool {
    tokio::select! {
        _ = running.changed() => *running.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Spawn the sender task
pub fn spawn_sender<S: SessionClient + 'static>(
    manager: ConnectionManager<S>,
    mut queue_rx: QueueReceiver,
    queue_tx: QueueSender,
    probe: Arc<dyn NetworkProbe>,
    check_interval: Duration,
    send_retry_interval: Duration,
    mut running: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        'outer: loop {
            if !*running.borrow() {
                break;
            }

            // 1. Next message, FIFO
            let message = tokio::select! {
                _ = running.changed() => continue,
                msg = queue_rx.next() => match msg {
                    Some(m) => m,
                    None => break,
                },
            };

            // 2. Wait until the network is reachable
            while !probe.is_reachable().await {
                warn!(
                    "No network. Retrying in {} sec...",
                    check_interval.as_secs()
                );
                if !interruptible_sleep(&mut running, check_interval).await {
                    break 'outer;
                }
            }

            // 3. Ensure the session is connected; the manager never retries,
            // this loop does
            if let Err(e) = manager.connect().await {
                warn!("Session unavailable ({e}), will retry sending later");
                queue_tx.enqueue(message);
                if !interruptible_sleep(&mut running, check_interval).await {
                    break;
                }
                continue;
            }

            // 4. One bounded delivery attempt
            match manager.send(&message, send_retry_interval).await {
                SendOutcome::Delivered => {}
                SendOutcome::TimedOut => {
                    let error = DispatchError::SendTimeout {
                        timeout_secs: send_retry_interval.as_secs(),
                    };
                    warn!("{error}, re-enqueueing message");
                    queue_tx.enqueue(message);
                    if !interruptible_sleep(&mut running, send_retry_interval).await {
                        break;
                    }
                }
                SendOutcome::Failed(reason) => {
                    let error = DispatchError::send_failed(reason);
                    warn!("{error}, re-enqueueing message");
                    queue_tx.enqueue(message);
                    if !interruptible_sleep(&mut running, send_retry_interval).await {
                        break;
                    }
                }
            }
        }
        info!("Sender stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(interruptible_sleep(&mut rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(true);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(false);
        });

        let completed = interruptible_sleep(&mut rx, Duration::from_secs(10)).await;
        assert!(!completed, "Sleep should be interrupted by shutdown");
    }
}
