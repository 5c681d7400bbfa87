use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{backoff::Strategy, job::record::JobRecord};

/// Decides whether a failed record gets another attempt, and when.
#[derive(Clone, Default)]
pub(crate) struct RetryPolicy {
    backoff: Option<Arc<dyn Strategy>>,
}

impl RetryPolicy {
    pub(crate) fn new(backoff: Option<Arc<dyn Strategy>>) -> Self {
        Self { backoff }
    }

    pub(crate) fn should_retry(&self, record: &JobRecord) -> bool {
        record.max_retries().allows(record.retry_count())
    }

    /// When the next attempt may start. `None` means immediately.
    ///
    /// A backoff reaching past the representable range waits until the end of time.
    pub(crate) fn retry_at(&self, record: &JobRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.backoff.as_ref().map(|backoff| {
            now.checked_add_signed(backoff.backoff(record.retry_count() + 1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }
}
