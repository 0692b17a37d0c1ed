use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Transient user-facing notices that dismiss themselves after `ttl`.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    ttl: TimeDelta,
    notices: VecDeque<Notice>,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::seconds(3)),
            notices: VecDeque::new(),
        }
    }

    pub fn raise(&mut self, level: NoticeLevel, message: impl Into<String>, now: DateTime<Utc>) -> Notice {
        self.expire(now);
        let notice = Notice {
            level,
            message: message.into(),
            raised_at: now,
        };
        self.notices.push_back(notice.clone());
        notice
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.notices.front() {
            if now - front.raised_at >= self.ttl {
                self.notices.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Notice> + '_ {
        let ttl = self.ttl;
        self.notices.iter().filter(move |n| now - n.raised_at < ttl)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Newest-first event log with a fixed number of entries.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    capacity: usize,
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.entries.push_front(ActivityEntry {
            at,
            message: message.into(),
        });
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
