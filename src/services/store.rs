//! The notification store: the shared source of truth every dashboard view
//! mirrors.
//!
//! Writes go to SQLite and are then published on a broadcast channel as
//! batches of `Change`s. A subscription is an async stream that starts with
//! the current matching records (as one batch of `Added` changes) and then
//! yields every later batch that touches its scope.
//!
//! A subscriber that falls behind the channel is told so with
//! `FeedError::Lagged` and then receives one corrective batch computed from a
//! fresh query, so its view converges on the store again.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};

use crate::db::{CreateNotification, Notification, NotificationRepository, ScopeFilter};
use crate::error::{AppError, AppResult};

/// One change to the notifications collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Notification),
    Modified(Notification),
    /// Removal carries only the id.
    Removed(String),
}

/// Changes delivered together, in the order the store emitted them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// The subscriber fell behind and missed `0` batches.
    #[error("notification feed lagged, {0} batches skipped")]
    Lagged(u64),

    #[error("notification feed unavailable: {0}")]
    Unavailable(String),
}

pub type FeedStream = BoxStream<'static, Result<ChangeBatch, FeedError>>;

/// Operations the dashboard needs from the document store.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    async fn create(&self, notification: CreateNotification) -> AppResult<Notification>;

    async fn query(&self, filter: &ScopeFilter) -> AppResult<Vec<Notification>>;

    /// Start an incremental subscription. The first item is always the
    /// current snapshot, possibly empty.
    async fn subscribe(&self, filter: ScopeFilter) -> AppResult<FeedStream>;

    async fn mark_read(&self, id: &str) -> AppResult<()>;

    /// Atomic: either every id is marked read or none is.
    async fn mark_read_batch(&self, ids: &[String]) -> AppResult<()>;

    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Atomic: either every listed record is removed or none is.
    async fn delete_batch(&self, ids: &[String]) -> AppResult<()>;
}

/// A published change tagged with the scope of the record it concerns, so
/// subscribers can filter removals that carry only an id.
#[derive(Debug, Clone)]
struct ScopedChange {
    scope: Option<String>,
    change: Change,
}

type Published = Arc<Vec<ScopedChange>>;

pub struct SqliteNotificationStore {
    pool: SqlitePool,
    events: broadcast::Sender<Published>,
    /// Held while writing and publishing, and while a subscriber takes its
    /// snapshot, so no change is both in a snapshot and in the live stream.
    publish_lock: Arc<Mutex<()>>,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool, channel_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            pool,
            events,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    fn publish(&self, changes: Vec<ScopedChange>) {
        if changes.is_empty() {
            return;
        }
        let count = changes.len();
        // Sending fails only when nobody is subscribed.
        if self.events.send(Arc::new(changes)).is_err() {
            tracing::trace!("No feed subscribers for {} change(s)", count);
        }
    }

    fn modified(notifications: Vec<Notification>) -> Vec<ScopedChange> {
        notifications
            .into_iter()
            .map(|n| ScopedChange {
                scope: n.scope.clone(),
                change: Change::Modified(n),
            })
            .collect()
    }

    fn removed(notifications: Vec<Notification>) -> Vec<ScopedChange> {
        notifications
            .into_iter()
            .map(|n| ScopedChange {
                scope: n.scope,
                change: Change::Removed(n.id),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Live,
    /// Lag was reported; the next poll re-queries before reading the channel.
    Resync,
    Ended,
}

/// Per-subscription state behind a `FeedStream`.
struct FeedCursor {
    rx: broadcast::Receiver<Published>,
    filter: ScopeFilter,
    pool: SqlitePool,
    events: broadcast::Sender<Published>,
    publish_lock: Arc<Mutex<()>>,
    /// Ids delivered to the subscriber and not yet reported removed.
    known: HashSet<String>,
    phase: Phase,
}

impl FeedCursor {
    async fn next(&mut self) -> Option<Result<ChangeBatch, FeedError>> {
        loop {
            match self.phase {
                Phase::Ended => return None,
                Phase::Resync => {
                    self.phase = Phase::Live;
                    match self.resync().await {
                        Ok(batch) if batch.changes.is_empty() => continue,
                        Ok(batch) => return Some(Ok(batch)),
                        Err(e) => {
                            self.phase = Phase::Ended;
                            return Some(Err(e));
                        }
                    }
                }
                Phase::Live => {}
            }

            match self.rx.recv().await {
                Ok(published) => {
                    let changes: Vec<Change> = published
                        .iter()
                        .filter(|c| self.filter.matches_scope(c.scope.as_deref()))
                        .map(|c| c.change.clone())
                        .collect();
                    if changes.is_empty() {
                        continue;
                    }
                    self.track(&changes);
                    return Some(Ok(ChangeBatch::new(changes)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Feed for scope {} lagged by {} batch(es), resyncing",
                        self.filter,
                        skipped
                    );
                    self.phase = Phase::Resync;
                    return Some(Err(FeedError::Lagged(skipped)));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn track(&mut self, changes: &[Change]) {
        for change in changes {
            match change {
                Change::Added(n) | Change::Modified(n) => {
                    self.known.insert(n.id.clone());
                }
                Change::Removed(id) => {
                    self.known.remove(id);
                }
            }
        }
    }

    /// Re-query the filter and describe the difference from what the
    /// subscriber was last told. The receiver is replaced under the publish
    /// lock, so nothing published before the query is delivered again.
    async fn resync(&mut self) -> Result<ChangeBatch, FeedError> {
        let _guard = self.publish_lock.lock().await;
        self.rx = self.events.subscribe();
        let current = NotificationRepository::find_by_filter(&self.pool, &self.filter)
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        let seen: HashSet<String> = current.iter().map(|n| n.id.clone()).collect();
        let mut changes: Vec<Change> = self
            .known
            .difference(&seen)
            .map(|id| Change::Removed(id.clone()))
            .collect();
        for n in current {
            if self.known.contains(&n.id) {
                changes.push(Change::Modified(n));
            } else {
                changes.push(Change::Added(n));
            }
        }
        self.known = seen;

        tracing::debug!(
            "Resynced feed for scope {}: {} change(s), {} record(s) held",
            self.filter,
            changes.len(),
            self.known.len()
        );
        Ok(ChangeBatch::new(changes))
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn create(&self, notification: CreateNotification) -> AppResult<Notification> {
        let _guard = self.publish_lock.lock().await;
        let created = NotificationRepository::create(&self.pool, notification).await?;
        tracing::debug!(
            "Created notification {} (kind={}, scope={:?})",
            created.id,
            created.kind.as_str(),
            created.scope
        );
        self.publish(vec![ScopedChange {
            scope: created.scope.clone(),
            change: Change::Added(created.clone()),
        }]);
        Ok(created)
    }

    async fn query(&self, filter: &ScopeFilter) -> AppResult<Vec<Notification>> {
        NotificationRepository::find_by_filter(&self.pool, filter).await
    }

    async fn subscribe(&self, filter: ScopeFilter) -> AppResult<FeedStream> {
        let (rx, snapshot) = {
            let _guard = self.publish_lock.lock().await;
            let rx = self.events.subscribe();
            let snapshot = NotificationRepository::find_by_filter(&self.pool, &filter)
                .await
                .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
            (rx, snapshot)
        };

        tracing::debug!(
            "Feed subscription for scope {} starts with {} record(s)",
            filter,
            snapshot.len()
        );

        let cursor = FeedCursor {
            rx,
            known: snapshot.iter().map(|n| n.id.clone()).collect(),
            filter,
            pool: self.pool.clone(),
            events: self.events.clone(),
            publish_lock: self.publish_lock.clone(),
            phase: Phase::Live,
        };
        let initial = ChangeBatch::new(snapshot.into_iter().map(Change::Added).collect());
        let live = stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.next().await?;
            Some((item, cursor))
        });

        Ok(stream::once(async move { Ok(initial) }).chain(live).boxed())
    }

    async fn mark_read(&self, id: &str) -> AppResult<()> {
        let _guard = self.publish_lock.lock().await;
        let updated = NotificationRepository::mark_read(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
        self.publish(Self::modified(vec![updated]));
        Ok(())
    }

    async fn mark_read_batch(&self, ids: &[String]) -> AppResult<()> {
        let _guard = self.publish_lock.lock().await;
        let updated = NotificationRepository::mark_read_batch(&self.pool, ids).await?;
        tracing::debug!("Marked {} notification(s) read in one batch", updated.len());
        self.publish(Self::modified(updated));
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let _guard = self.publish_lock.lock().await;
        if let Some(removed) = NotificationRepository::delete(&self.pool, id).await? {
            self.publish(Self::removed(vec![removed]));
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> AppResult<()> {
        let _guard = self.publish_lock.lock().await;
        let removed = NotificationRepository::delete_batch(&self.pool, ids).await?;
        tracing::debug!("Deleted {} notification(s) in one batch", removed.len());
        self.publish(Self::removed(removed));
        Ok(())
    }
}
