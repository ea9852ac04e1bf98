//! Reconciliation of change batches into a view's local notification set.

use std::collections::HashMap;

use crate::db::Notification;
use crate::services::store::{Change, ChangeBatch};

/// What applying one batch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub upserted: usize,
    pub removed: usize,
    /// `Added` changes whose record was unread; one alert is due for each.
    pub alerts: usize,
}

/// Local mirror of the notifications matching a view's filter.
///
/// The unread count is always derived from `records`; there is no separate
/// counter that could drift.
#[derive(Debug, Default)]
pub struct FeedState {
    records: HashMap<String, Notification>,
    /// Ids in display order: newest first, undated records last.
    order: Vec<String>,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, batch: ChangeBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for change in batch.changes {
            match change {
                Change::Added(record) => {
                    if !record.read {
                        outcome.alerts += 1;
                    }
                    self.records.insert(record.id.clone(), record);
                    outcome.upserted += 1;
                }
                Change::Modified(record) => {
                    self.records.insert(record.id.clone(), record);
                    outcome.upserted += 1;
                }
                Change::Removed(id) => {
                    if self.records.remove(&id).is_some() {
                        outcome.removed += 1;
                    }
                }
            }
        }

        self.resort();
        outcome
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.records.get(id)
    }

    pub fn unread_count(&self) -> usize {
        self.records.values().filter(|n| !n.read).count()
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|n| !n.read))
            .cloned()
            .collect()
    }

    /// Notifications in display order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    /// Returns `true` if the record existed and was unread.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            self.order.retain(|o| o != id);
        }
        removed
    }

    pub fn remove_many(&mut self, ids: &[String]) -> usize {
        let before = self.records.len();
        for id in ids {
            self.records.remove(id);
        }
        self.order.retain(|o| self.records.contains_key(o));
        before - self.records.len()
    }

    fn resort(&mut self) {
        let mut order: Vec<(i64, &String)> = self
            .records
            .values()
            .map(|n| (n.sort_millis(), &n.id))
            .collect();
        // Newest first; ties by id so the order is stable between batches.
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        self.order = order.into_iter().map(|(_, id)| id.clone()).collect();
    }
}
