//! ============================================================================
//! Call-Log Correlator - Best-Effort Dialer Log Enrichment
//! ============================================================================
//! The dialer fires its webhook before the call shows up in its own log, so
//! the correlator polls the log a few times with growing delays:
//! - attempt 1 immediately, attempt 2 after 3s, attempt 3 after 5s
//! - first non-empty result wins, newest entry returned
//! - every error (timeout, non-2xx, bad JSON) counts as an empty attempt
//!
//! Enrichment never fails the forwarding path: the worst case is `None`.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::CallLogSource;
use crate::types::CorrelatedLog;

/// Delay before each attempt; its length is the attempt budget
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(0),
    Duration::from_millis(3000),
    Duration::from_millis(5000),
];

pub struct CallLogCorrelator {
    source: Arc<dyn CallLogSource>,
    backoff: Vec<Duration>,
}

impl CallLogCorrelator {
    pub fn new(source: Arc<dyn CallLogSource>) -> Self {
        Self::with_backoff(source, DEFAULT_BACKOFF.to_vec())
    }

    /// Custom delay schedule, one entry per attempt
    pub fn with_backoff(source: Arc<dyn CallLogSource>, backoff: Vec<Duration>) -> Self {
        Self { source, backoff }
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len()
    }

    /// Find the newest dialer log entry for the phone key.
    pub async fn find_latest(&self, phone_digits: &str) -> Option<CorrelatedLog> {
        if phone_digits.is_empty() {
            return None;
        }

        for (index, delay) in self.backoff.iter().enumerate() {
            let attempt = index as u32 + 1;
            if !delay.is_zero() {
                debug!("Waiting {:?} before dialer log attempt {}", delay, attempt);
                sleep(*delay).await;
            }

            match self.source.fetch_recent(phone_digits).await {
                Ok(entries) => {
                    if let Some(entry) = entries.into_iter().next() {
                        info!(
                            "Matched dialer log {} for {} on attempt {}",
                            entry.id, phone_digits, attempt
                        );
                        return Some(CorrelatedLog { entry, attempt });
                    }
                    debug!("Dialer log empty for {} (attempt {})", phone_digits, attempt);
                }
                Err(e) => {
                    warn!(
                        "Dialer log lookup failed for {} (attempt {}): {}",
                        phone_digits, attempt, e
                    );
                }
            }
        }

        info!(
            "No dialer log match for {} after {} attempts",
            phone_digits,
            self.max_attempts()
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, Result};
    use crate::types::DialerLogEntry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays one scripted response per call, then empty results
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<DialerLogEntry>>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<DialerLogEntry>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CallLogSource for ScriptedSource {
        async fn fetch_recent(&self, _phone_digits: &str) -> Result<Vec<DialerLogEntry>> {
            self.calls.lock().unwrap().push(Instant::now());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn entry(id: &str) -> DialerLogEntry {
        DialerLogEntry {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_on_third_attempt_after_backoff() {
        let source = ScriptedSource::new(vec![
            Ok(vec![]),
            Ok(vec![]),
            Ok(vec![entry("newest"), entry("older")]),
        ]);
        let correlator = CallLogCorrelator::new(source.clone());

        let started = Instant::now();
        let found = correlator.find_latest("4155550100").await.unwrap();

        assert_eq!(found.attempt, 3);
        assert_eq!(found.entry.id, "newest");
        assert_eq!(source.call_count(), 3);
        assert!(started.elapsed() >= Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_after_three_empty_attempts() {
        let source = ScriptedSource::new(vec![Ok(vec![]), Ok(vec![]), Ok(vec![])]);
        let correlator = CallLogCorrelator::new(source.clone());

        assert!(correlator.find_latest("4155550100").await.is_none());
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_absorbed() {
        let source = ScriptedSource::new(vec![
            Err(RelayError::DialerStatus {
                status: 503,
                body: "busy".to_string(),
            }),
            Err(RelayError::Decode("garbage".to_string())),
            Ok(vec![entry("late")]),
        ]);
        let correlator = CallLogCorrelator::new(source.clone());

        let found = correlator.find_latest("4155550100").await.unwrap();
        assert_eq!(found.attempt, 3);
        assert_eq!(found.entry.id, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_has_no_delay() {
        let source = ScriptedSource::new(vec![Ok(vec![entry("now")])]);
        let correlator = CallLogCorrelator::new(source.clone());

        let started = Instant::now();
        let found = correlator.find_latest("4155550100").await.unwrap();
        assert_eq!(found.attempt, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_empty_phone_skips_lookup() {
        let source = ScriptedSource::new(vec![Ok(vec![entry("x")])]);
        let correlator = CallLogCorrelator::new(source.clone());

        assert!(correlator.find_latest("").await.is_none());
        assert_eq!(source.call_count(), 0);
    }
}
