use std::time::Duration;

use url::Url;

use crate::buffer::DEFAULT_CAPACITY;

pub const DEFAULT_PRIMARY_URL: &str = "http://127.0.0.1:5002";
pub const DEFAULT_FALLBACK_URL: &str = "http://127.0.0.1:5001";
pub const DEFAULT_PUSH_URL: &str = "http://127.0.0.1:5002";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub window_capacity: usize,
    pub history_hours: u32,
    pub notice_ttl: Duration,
    pub activity_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_CAPACITY,
            history_hours: 1,
            notice_ttl: Duration::from_secs(3),
            activity_capacity: 50,
        }
    }
}

/// Where the client talks to. The fallback origin only serves the device list.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub primary: Url,
    pub fallback: Url,
    pub push: Url,
}

impl Endpoints {
    pub fn new(primary: Url, fallback: Url, push: Url) -> Self {
        Self {
            primary,
            fallback,
            push,
        }
    }

    pub fn local() -> Result<Self, url::ParseError> {
        Ok(Self {
            primary: Url::parse(DEFAULT_PRIMARY_URL)?,
            fallback: Url::parse(DEFAULT_FALLBACK_URL)?,
            push: Url::parse(DEFAULT_PUSH_URL)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max_backoff)
            .max(self.min_backoff)
    }
}
