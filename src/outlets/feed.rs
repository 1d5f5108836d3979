//! ChangeFeedListener: drive outlet re-sync from store change notifications
//!
//! A single consumer task reads the subscription. The first notification opens
//! a fixed window; everything arriving before it closes is absorbed, then one
//! refresh runs. Notifications that arrive during that refresh queue up and
//! produce one trailing refresh, so a steady stream still refreshes once per
//! window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::store::{OutletStateStore, RefreshOutcome};
use crate::db::Subscription;

pub struct ChangeFeedListener {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeedListener {
    pub fn start(
        store: Arc<OutletStateStore>,
        subscription: Subscription,
        debounce: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(store, subscription, debounce, stop_rx));

        tracing::info!(
            "[ChangeFeed] Listener started (debounce {}ms)",
            debounce.as_millis()
        );
        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Unsubscribe and wait for the consumer task to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("[ChangeFeed] Listener task ended abnormally: {}", e);
            }
        }
        tracing::info!("[ChangeFeed] Listener stopped");
    }
}

impl Drop for ChangeFeedListener {
    fn drop(&mut self) {
        // Dropping the sender still ends the task, which unsubscribes
        if self.stop.take().is_some() {
            tracing::error!("[ChangeFeed] Listener dropped without stop()");
        }
    }
}

async fn run(
    store: Arc<OutletStateStore>,
    mut subscription: Subscription,
    debounce: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let first = tokio::select! {
            _ = &mut stop => break,
            event = subscription.recv() => event,
        };
        let Some(first) = first else {
            tracing::warn!("[ChangeFeed] Notification stream ended");
            break;
        };

        let mut absorbed = 1usize;
        let mut closed = false;
        let mut stopped = false;
        let window = tokio::time::sleep_until(tokio::time::Instant::now() + debounce);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut stop => {
                    stopped = true;
                    break;
                }
                _ = &mut window => break,
                event = subscription.recv() => match event {
                    Some(_) => absorbed += 1,
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }
        if stopped {
            tracing::debug!(
                "[ChangeFeed] Stopped with {} notification(s) pending",
                absorbed
            );
            break;
        }

        tracing::debug!(
            "[ChangeFeed] {} notification(s) on {} since {} (first: {}), refreshing",
            absorbed,
            first.table,
            first.received_at.to_rfc3339(),
            first.operation
        );
        match store.refresh().await {
            RefreshOutcome::Degraded { error, .. } => {
                tracing::warn!("[ChangeFeed] Triggered refresh degraded: {}", error)
            }
            RefreshOutcome::Refreshed { .. } | RefreshOutcome::Skipped => {}
        }

        if closed {
            tracing::warn!("[ChangeFeed] Notification stream ended");
            break;
        }
    }

    subscription.unsubscribe().await;
}
