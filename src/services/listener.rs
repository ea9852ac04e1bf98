//! The task that keeps a view's inbox in step with the store's change feed.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::db::ScopeFilter;
use crate::services::inbox::Inbox;
use crate::services::store::{FeedError, NotificationStore};

/// Handle to a running feed listener. Dropping it unsubscribes.
pub struct Subscription {
    inbox: Arc<Inbox>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Stop the listener. Synchronous and idempotent; once this returns no
    /// further batch reaches the inbox.
    pub fn unsubscribe(&self) {
        self.inbox.unmount();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!("Feed listener stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inbox.is_mounted()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Spawn a listener feeding `inbox` from `store`, filtered by `filter`.
/// Must be called from within a Tokio runtime.
pub fn subscribe(
    store: Arc<dyn NotificationStore>,
    filter: ScopeFilter,
    inbox: Arc<Inbox>,
) -> Subscription {
    let task = {
        let inbox = inbox.clone();
        tokio::spawn(async move {
            let mut feed = match store.subscribe(filter.clone()).await {
                Ok(feed) => feed,
                Err(e) => {
                    inbox.record_feed_error(&FeedError::Unavailable(e.to_string()));
                    return;
                }
            };
            tracing::info!("Listening for notifications (scope={})", filter);

            while let Some(item) = feed.next().await {
                match item {
                    Ok(batch) => {
                        if inbox.apply_batch(batch).is_none() {
                            tracing::debug!("Discarding batch for unmounted view (scope={})", filter);
                            break;
                        }
                        tracing::trace!(
                            "Scope {} now has {} unread notification(s)",
                            filter,
                            inbox.unread_count()
                        );
                    }
                    Err(e) => inbox.record_feed_error(&e),
                }
            }

            tracing::info!("Notification feed ended (scope={})", filter);
        })
    };

    Subscription {
        inbox,
        task: Mutex::new(Some(task)),
    }
}
