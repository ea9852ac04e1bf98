use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient message for the dashboard to show as a toast.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Bounded queue of undelivered notices. When full, the oldest is dropped.
#[derive(Debug)]
pub struct NoticeBoard {
    capacity: usize,
    pending: VecDeque<Notice>,
}

impl NoticeBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: VecDeque::new(),
        }
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(NoticeLevel::Success, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(NoticeLevel::Error, message.into());
    }

    /// Hand every pending notice to the caller.
    pub fn drain(&mut self) -> Vec<Notice> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn count(&self, level: NoticeLevel) -> usize {
        self.pending.iter().filter(|n| n.level == level).count()
    }

    fn push(&mut self, level: NoticeLevel, message: String) {
        if self.pending.len() == self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(Notice {
            level,
            message,
            created_at: Utc::now(),
        });
    }
}
