//! Live windowed views over the store.
//!
//! A subscription is a background task that listens to the store's change
//! feed, re-queries its window on every relevant change and pushes the full
//! window to the subscriber whenever it differs from the last one sent.
//! Refresh errors never reach the subscriber: the stream just stops
//! producing and its [`SubscriptionStatus`] turns `Stalled` once failures
//! pile up, recovering on the next successful refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ss_domain::config::SubscriptionsConfig;
use ss_domain::error::{Error, Result};
use ss_domain::model::{Conversation, Message};
use ss_domain::trace::TraceEvent;

use crate::store::{ConversationQuery, DocumentStore, MessageQuery, StoreChange};

/// Retry cadence while a subscription is failing, capped at 30s.
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Live,
    Stalled { failures: u32 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to a running subscription. Dropping it cancels the refresh task.
pub struct Subscription<T> {
    id: String,
    rx: mpsc::Receiver<Vec<T>>,
    status: watch::Receiver<SubscriptionStatus>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn status_watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    /// Stop the subscription. Safe to call more than once; after it returns
    /// no further snapshots are produced.
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> futures_core::Stream for Subscription<T> {
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    config: SubscriptionsConfig,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: SubscriptionsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SubscriptionsConfig {
        &self.config
    }

    /// The most recent `window` messages of a conversation, oldest first.
    pub fn subscribe_messages(&self, conversation_id: &str, window: usize) -> Subscription<Message> {
        let window = self.config.window(Some(window));
        let store = self.store.clone();
        let target = conversation_id.to_owned();
        let wanted = target.clone();

        self.spawn(
            format!("messages:{target}"),
            window,
            move |change| matches!(change, StoreChange::Messages { conversation_id } if *conversation_id == wanted),
            move || {
                let store = store.clone();
                let target = target.clone();
                async move {
                    let mut newest = store
                        .query_messages(&target, MessageQuery::newest(window))
                        .await?;
                    newest.reverse();
                    Ok::<_, Error>(newest)
                }
            },
        )
    }

    /// The `window` most recently active conversations of an owner.
    pub fn subscribe_conversations(
        &self,
        owner_id: &str,
        window: usize,
    ) -> Subscription<Conversation> {
        let window = self.config.window(Some(window));
        let store = self.store.clone();
        let owner = owner_id.to_owned();
        let wanted = owner.clone();

        self.spawn(
            format!("conversations:{owner}"),
            window,
            move |change| matches!(change, StoreChange::Conversations { owner_id } if *owner_id == wanted),
            move || {
                let store = store.clone();
                let owner = owner.clone();
                async move {
                    store
                        .query_conversations(
                            &owner,
                            ConversationQuery {
                                limit: Some(window),
                                start_after: None,
                            },
                        )
                        .await
                }
            },
        )
    }

    fn spawn<T, M, F, Fut>(&self, target: String, window: usize, relevant: M, fetch: F) -> Subscription<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        M: Fn(&StoreChange) -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Live);
        let cancel = CancellationToken::new();

        // Subscribe before the first fetch so no change slips between them.
        let changes = self.store.watch();

        TraceEvent::SubscriptionOpened {
            subscription_id: id.clone(),
            target,
            window,
        }
        .emit();

        let task = RefreshTask {
            id: id.clone(),
            tx,
            status: status_tx,
            cancel: cancel.clone(),
            stall_threshold: self.config.stall_threshold.max(1),
        };
        tokio::spawn(task.run(changes, relevant, fetch));

        Subscription {
            id,
            rx,
            status: status_rx,
            cancel,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refresh task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RefreshTask<T> {
    id: String,
    tx: mpsc::Sender<Vec<T>>,
    status: watch::Sender<SubscriptionStatus>,
    cancel: CancellationToken,
    stall_threshold: u32,
}

enum Refresh {
    Continue,
    /// The subscriber is gone.
    Closed,
}

impl<T> RefreshTask<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn run<M, F, Fut>(
        self,
        mut changes: broadcast::Receiver<StoreChange>,
        relevant: M,
        fetch: F,
    ) where
        M: Fn(&StoreChange) -> bool,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut last: Option<Vec<T>> = None;
        let mut failures: u32 = 0;

        let mut outcome = self.refresh(&fetch, &mut last, &mut failures).await;
        while let Refresh::Continue = outcome {
            let retry_in = retry_delay(failures);
            outcome = tokio::select! {
                _ = self.cancel.cancelled() => Refresh::Closed,
                _ = tokio::time::sleep(retry_in), if failures > 0 => {
                    self.refresh(&fetch, &mut last, &mut failures).await
                }
                change = changes.recv() => match change {
                    Ok(change) if relevant(&change) => {
                        self.refresh(&fetch, &mut last, &mut failures).await
                    }
                    Ok(_) => Refresh::Continue,
                    // Missed notifications: the next query catches up anyway.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(subscription_id = %self.id, skipped, "change feed lagged");
                        self.refresh(&fetch, &mut last, &mut failures).await
                    }
                    Err(broadcast::error::RecvError::Closed) => Refresh::Closed,
                },
            };
        }

        TraceEvent::SubscriptionClosed {
            subscription_id: self.id.clone(),
        }
        .emit();
    }

    async fn refresh<F, Fut>(
        &self,
        fetch: &F,
        last: &mut Option<Vec<T>>,
        failures: &mut u32,
    ) -> Refresh
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let items = match fetch().await {
            Ok(items) => items,
            Err(e) => {
                *failures += 1;
                tracing::warn!(
                    subscription_id = %self.id,
                    failures = *failures,
                    error = %e,
                    "subscription refresh failed"
                );
                if *failures == self.stall_threshold {
                    TraceEvent::SubscriptionStalled {
                        subscription_id: self.id.clone(),
                        failures: *failures,
                    }
                    .emit();
                }
                if *failures >= self.stall_threshold {
                    self.status.send_replace(SubscriptionStatus::Stalled {
                        failures: *failures,
                    });
                }
                return Refresh::Continue;
            }
        };

        if *failures > 0 {
            tracing::info!(subscription_id = %self.id, "subscription recovered");
            *failures = 0;
            self.status.send_replace(SubscriptionStatus::Live);
        }

        if last.as_ref() == Some(&items) {
            return Refresh::Continue;
        }
        *last = Some(items.clone());

        tokio::select! {
            _ = self.cancel.cancelled() => Refresh::Closed,
            sent = self.tx.send(items) => match sent {
                Ok(()) => Refresh::Continue,
                Err(_) => Refresh::Closed,
            },
        }
    }
}

fn retry_delay(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(6);
    (RETRY_BASE * factor).min(RETRY_MAX)
}
