//! A department view's notification inbox: the reconciled feed plus the
//! read/delete commands an admin issues against it.
//!
//! Every command calls the store first and touches local state only once the
//! store has confirmed. A failed command therefore leaves the local set
//! exactly as it was, and is reported through a logged error and an error
//! notice.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::db::Notification;
use crate::error::{AppError, AppResult};
use crate::services::audio::{AudioAlerts, AudioGate};
use crate::services::feed::{BatchOutcome, FeedState};
use crate::services::notices::{Notice, NoticeBoard};
use crate::services::store::{ChangeBatch, FeedError, NotificationStore};

struct InboxState {
    feed: FeedState,
    notices: NoticeBoard,
    /// Cleared on unsubscribe; batches arriving afterwards are discarded.
    mounted: bool,
}

/// Point-in-time copy of what the view shows.
#[derive(Debug, Clone, Serialize)]
pub struct InboxSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub audio: AudioGate,
    pub pending_notices: usize,
}

pub struct Inbox {
    store: Arc<dyn NotificationStore>,
    audio: AudioAlerts,
    state: Mutex<InboxState>,
}

impl Inbox {
    pub fn new(store: Arc<dyn NotificationStore>, audio: AudioAlerts, notice_capacity: usize) -> Self {
        Self {
            store,
            audio,
            state: Mutex::new(InboxState {
                feed: FeedState::new(),
                notices: NoticeBoard::new(notice_capacity),
                mounted: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        let state = self.lock();
        InboxSnapshot {
            notifications: state.feed.notifications(),
            unread_count: state.feed.unread_count(),
            audio: self.audio.gate(),
            pending_notices: state.notices.len(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.lock().feed.unread_count()
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    /// Reconcile one feed batch. Returns `None` if the view has been
    /// unmounted, in which case the batch was discarded.
    ///
    /// Alerts are requested before the state lock is released, so once
    /// `unmount` has returned no further alert can play for this view.
    pub fn apply_batch(&self, batch: ChangeBatch) -> Option<BatchOutcome> {
        let mut state = self.lock();
        if !state.mounted {
            return None;
        }
        let outcome = state.feed.apply(batch);
        for _ in 0..outcome.alerts {
            self.audio.request_alert();
        }
        let held = state.feed.len();
        drop(state);

        tracing::debug!(
            "Applied feed batch: upserted={}, removed={}, alerts={}, held={}",
            outcome.upserted,
            outcome.removed,
            outcome.alerts,
            held
        );
        Some(outcome)
    }

    /// A subscription error leaves the current set in place.
    pub fn record_feed_error(&self, error: &FeedError) {
        tracing::warn!("Notification feed error: {}", error);
        let mut state = self.lock();
        if state.mounted {
            state
                .notices
                .error("Live notifications are unavailable; showing the last known list");
        }
    }

    pub(crate) fn unmount(&self) {
        self.lock().mounted = false;
    }

    pub fn on_gesture(&self) -> AudioGate {
        self.audio.on_gesture()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.lock().notices.drain()
    }

    /// Mark one notification read. Returns `false` when it already was.
    pub async fn mark_one_read(&self, id: &str) -> AppResult<bool> {
        {
            let state = self.lock();
            match state.feed.get(id) {
                None => return Err(AppError::NotFound(format!("Notification {} not found", id))),
                Some(n) if n.read => return Ok(false),
                Some(_) => {}
            }
        }

        if let Err(e) = self.store.mark_read(id).await {
            return Err(self.fail("Failed to mark notification as read", e));
        }

        self.lock().feed.mark_read(id);
        Ok(true)
    }

    /// Mark every unread notification read in one atomic store batch.
    /// Returns how many were unread; zero means nothing was sent to the store.
    pub async fn mark_all_read(&self) -> AppResult<usize> {
        let ids = self.lock().feed.unread_ids();
        if ids.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.store.mark_read_batch(&ids).await {
            return Err(self.fail("Failed to mark all notifications as read", e));
        }

        // Only the ids the store confirmed; records that arrived meanwhile
        // keep their own read state.
        let mut state = self.lock();
        for id in &ids {
            state.feed.mark_read(id);
        }
        state.notices.success("All notifications marked as read");
        tracing::info!("Marked {} notification(s) read", ids.len());
        Ok(ids.len())
    }

    pub async fn delete_one(&self, id: &str) -> AppResult<()> {
        if self.lock().feed.get(id).is_none() {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }

        if let Err(e) = self.store.delete(id).await {
            return Err(self.fail("Failed to delete notification", e));
        }

        let mut state = self.lock();
        state.feed.remove(id);
        state.notices.success("Notification deleted");
        Ok(())
    }

    /// Delete every held notification in one atomic store batch.
    pub async fn delete_all(&self) -> AppResult<usize> {
        let ids = self.lock().feed.ids();
        if ids.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.store.delete_batch(&ids).await {
            return Err(self.fail("Failed to clear notifications", e));
        }

        let mut state = self.lock();
        let removed = state.feed.remove_many(&ids);
        state.notices.success("All notifications cleared");
        tracing::info!("Cleared {} notification(s)", removed);
        Ok(ids.len())
    }

    fn fail(&self, message: &str, error: AppError) -> AppError {
        tracing::error!("{}: {}", message, error);
        self.lock().notices.error(message);
        error
    }
}
