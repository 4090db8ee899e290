//! Boundary collaborators consumed by the engine.
//!
//! Network access, user interaction and wall-clock time all come in through
//! these traits so the engine can run headless, in a terminal, or under test.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::SyncError;

/// Retrieves remote documents and archives.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the body at `url`. Fails with [`SyncError::Network`].
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError>;

    /// Fetch and parse a JSON document. A body that is not JSON is a
    /// [`SyncError::Validation`].
    async fn fetch_json(&self, url: &str) -> Result<Value, SyncError> {
        let bytes = self.fetch(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::Validation {
            url: url.to_string(),
            message: format!("body is not JSON: {e}"),
        })
    }
}

/// A yes/no question put to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub title: String,
    pub body: String,
    pub affirm: String,
    pub decline: String,
}

impl Confirmation {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        affirm: impl Into<String>,
        decline: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            affirm: affirm.into(),
            decline: decline.into(),
        }
    }
}

/// User interaction surface.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Suspends until the user answers. There is no timeout.
    async fn confirm(&self, question: Confirmation) -> bool;

    /// Fire-and-forget message shown for roughly `duration`.
    fn notify(&self, message: &str, duration: Duration);
}

/// Default on-screen time for notices.
pub const NOTICE_DURATION: Duration = Duration::from_secs(5);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
