//! Test doubles for the store and the audio player.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::mpsc;
use futures::StreamExt;

use crate::db::{CreateNotification, Notification, NotificationKind, ScopeFilter};
use crate::error::{AppError, AppResult};
use crate::services::audio::{AudioError, AudioPlayer};
use crate::services::store::{ChangeBatch, Change, FeedError, FeedStream, NotificationStore};

pub fn notification(id: &str, read: bool, created_secs: Option<i64>) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationKind::NewAppointment,
        message: format!("Appointment {}", id),
        subject_name: "Patient".to_string(),
        occurs_on: Some("2026-05-04".to_string()),
        slot_time: Some("11:00".to_string()),
        created_at: created_secs.and_then(|s| Utc.timestamp_opt(s, 0).single()),
        read,
        scope: Some("dental".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    MarkRead(String),
    MarkReadBatch(Vec<String>),
    Delete(String),
    DeleteBatch(Vec<String>),
}

/// In-memory store that records every write and lets tests push feed
/// batches by hand.
#[derive(Default)]
pub struct FakeStore {
    snapshot: Mutex<HashMap<String, Notification>>,
    calls: Mutex<Vec<StoreCall>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<Result<ChangeBatch, FeedError>>>>,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    /// Runs once inside the next `mark_read_batch`, before it returns.
    batch_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeStore {
    pub fn with_records(records: Vec<Notification>) -> Self {
        let store = Self::default();
        {
            let mut snapshot = store.snapshot.lock().unwrap();
            for r in records {
                snapshot.insert(r.id.clone(), r);
            }
        }
        store
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_subscribe_failing(&self, failing: bool) {
        self.fail_subscribe.store(failing, Ordering::SeqCst);
    }

    pub fn on_next_batch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.batch_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Deliver a batch to every open subscription.
    pub fn push(&self, changes: Vec<Change>) {
        let batch = ChangeBatch::new(changes);
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|tx| tx.unbounded_send(Ok(batch.clone())).is_ok());
    }

    pub fn push_error(&self, error: FeedError) {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|tx| tx.unbounded_send(Err(error.clone())).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|tx| !tx.is_closed());
        feeds.len()
    }

    fn record(&self, call: StoreCall) -> AppResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for FakeStore {
    async fn create(&self, notification: CreateNotification) -> AppResult<Notification> {
        let id = format!("fake-{}", self.snapshot.lock().unwrap().len() + 1);
        let created = Notification {
            id: id.clone(),
            kind: notification.kind,
            message: notification.message,
            subject_name: notification.subject_name,
            occurs_on: notification.occurs_on,
            slot_time: notification.slot_time,
            created_at: Some(Utc::now()),
            read: false,
            scope: notification.scope,
        };
        self.snapshot.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn query(&self, filter: &ScopeFilter) -> AppResult<Vec<Notification>> {
        Ok(self
            .snapshot
            .lock()
            .unwrap()
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, filter: ScopeFilter) -> AppResult<FeedStream> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("permission denied".to_string()));
        }
        let initial = self.query(&filter).await?;
        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(Ok(ChangeBatch::new(
            initial.into_iter().map(Change::Added).collect(),
        )))
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;
        self.feeds.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }

    async fn mark_read(&self, id: &str) -> AppResult<()> {
        self.record(StoreCall::MarkRead(id.to_string()))
    }

    async fn mark_read_batch(&self, ids: &[String]) -> AppResult<()> {
        let hook = self.batch_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.record(StoreCall::MarkReadBatch(ids.to_vec()))
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.record(StoreCall::Delete(id.to_string()))?;
        self.snapshot.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> AppResult<()> {
        self.record(StoreCall::DeleteBatch(ids.to_vec()))?;
        let mut snapshot = self.snapshot.lock().unwrap();
        for id in ids {
            snapshot.remove(id);
        }
        Ok(())
    }
}

/// Player that remembers what it was asked to play.
#[derive(Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingPlayer {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.played.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl AudioPlayer for RecordingPlayer {
    fn play(&self, url: &str) -> Result<(), AudioError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AudioError::NoListener);
        }
        self.played.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Poll `check` until it holds, failing the test after a second.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
