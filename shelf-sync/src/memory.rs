//! In-memory collaborators: a URL → bytes fetcher, a scripted prompter and a
//! hand-advanced clock. Used by embedders that drive the engine themselves
//! and throughout the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::collab::{Clock, Confirmation, Fetcher, Prompter};
use crate::SyncError;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// StaticFetcher
// ---------------------------------------------------------------------------

/// Serves fixed bodies per URL; unknown URLs fail with a network error.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        lock(&self.bodies).insert(url.into(), body.into());
    }

    pub fn insert_json(&self, url: impl Into<String>, value: &serde_json::Value) {
        self.insert(url, value.to_string().into_bytes());
    }

    pub fn remove(&self, url: &str) {
        lock(&self.bodies).remove(url);
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        lock(&self.requests).push(url.to_string());
        lock(&self.bodies)
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::Network {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ScriptedPrompter
// ---------------------------------------------------------------------------

/// Answers confirmations from a queue, falling back to a default answer, and
/// records everything it was asked and told.
#[derive(Debug)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    asked: Mutex<Vec<Confirmation>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Answer every confirmation with `fallback`.
    pub fn answering(fallback: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            fallback,
            asked: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    /// Queue specific answers; once exhausted the fallback applies.
    pub fn with_answers(self, answers: impl IntoIterator<Item = bool>) -> Self {
        lock(&self.answers).extend(answers);
        self
    }

    pub fn asked(&self) -> Vec<Confirmation> {
        lock(&self.asked).clone()
    }

    pub fn notices(&self) -> Vec<String> {
        lock(&self.notices).clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, question: Confirmation) -> bool {
        lock(&self.asked).push(question);
        lock(&self.answers).pop_front().unwrap_or(self.fallback)
    }

    fn notify(&self, message: &str, _duration: Duration) {
        lock(&self.notices).push(message.to_string());
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 2024-01-01T00:00:00Z
    pub fn fixed() -> Self {
        Self::new(Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_fetcher_serves_and_records() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://a", b"body".to_vec());
        assert_eq!(fetcher.fetch("https://a").await.unwrap(), b"body");
        let err = fetcher.fetch("https://b").await.unwrap_err();
        assert!(matches!(err, SyncError::Network { .. }));
        assert_eq!(fetcher.requests(), vec!["https://a", "https://b"]);
    }

    #[tokio::test]
    async fn non_json_body_is_validation_error() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://a", b"<html>".to_vec());
        let err = fetcher.fetch_json("https://a").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn scripted_prompter_uses_queue_then_fallback() {
        let prompter = ScriptedPrompter::answering(false).with_answers([true]);
        let q = Confirmation::new("t", "b", "yes", "no");
        assert!(prompter.confirm(q.clone()).await);
        assert!(!prompter.confirm(q).await);
        assert_eq!(prompter.asked().len(), 2);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::fixed();
        let start = clock.now();
        clock.advance(chrono::Duration::days(8));
        assert_eq!(clock.now() - start, chrono::Duration::days(8));
    }
}
