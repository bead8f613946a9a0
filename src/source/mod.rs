//! Read-only data source access.
//!
//! Every collector issues exactly one provider call through [`DataSource`],
//! which returns the provider's raw JSON output. The production
//! implementation reads exported provider output from a snapshot directory.

pub mod snapshot;

pub use snapshot::SnapshotSource;

use crate::error::SourceError;
use crate::models::Source;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Read-only query context handed to every collector.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Account or scope label the review runs for.
    pub account: String,
    /// Start of the time window under review.
    pub window_start: DateTime<Utc>,
    /// End of the time window under review.
    pub window_end: DateTime<Utc>,
    /// Access keys older than this many days are reported.
    pub max_key_age_days: i64,
}

impl QueryContext {
    /// Context covering the `lookback_days` ending at `now`.
    pub fn new(account: impl Into<String>, now: DateTime<Utc>, lookback_days: i64) -> Self {
        Self {
            account: account.into(),
            window_start: now - Duration::days(lookback_days),
            window_end: now,
            max_key_age_days: 90,
        }
    }

    pub fn with_max_key_age(mut self, days: i64) -> Self {
        self.max_key_age_days = days;
        self
    }

    /// Evaluation instant used as the detection time of configuration findings.
    pub fn now(&self) -> DateTime<Utc> {
        self.window_end
    }
}

/// A read-only provider API. No implementation may issue writes.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the raw provider output for one source.
    async fn fetch(&self, source: Source, query: &QueryContext) -> Result<Value, SourceError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    /// In-memory source keyed by [`Source`].
    #[derive(Default)]
    pub struct StaticSource {
        responses: HashMap<Source, Result<Value, String>>,
        delay: Option<StdDuration>,
    }

    impl StaticSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, source: Source, value: Value) -> Self {
            self.responses.insert(source, Ok(value));
            self
        }

        pub fn failing(mut self, source: Source, message: &str) -> Self {
            self.responses.insert(source, Err(message.to_string()));
            self
        }

        pub fn delayed(mut self, delay: StdDuration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl DataSource for StaticSource {
        async fn fetch(&self, source: Source, _query: &QueryContext) -> Result<Value, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.responses.get(&source) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(message)) => Err(SourceError::Unreachable(message.clone())),
                None => Err(SourceError::NotConfigured(format!("no data for {}", source))),
            }
        }
    }

    pub fn query() -> QueryContext {
        let now = DateTime::parse_from_rfc3339("2025-04-01T12:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap();
        QueryContext::new("123456789012", now, 7)
    }
}
