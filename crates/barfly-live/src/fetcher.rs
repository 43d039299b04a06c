//! Candidate retrieval over planned key ranges.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use barfly_geo::{refine, KeyRange};
use barfly_store::{RecordStore, StoreError};
use barfly_types::{IndexedRecord, SearchQuery};
use futures_util::future::join_all;

use crate::{LiveConfig, LiveError};

/// Result of reading a set of key ranges.
///
/// A range that failed part-way contributes no records and is listed in
/// `failed`, so it can be retried as a whole.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: Vec<IndexedRecord>,
    pub failed: Vec<KeyRange>,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Reads candidate records for a proximity query from the record store.
#[derive(Clone)]
pub struct CandidateFetcher {
    store: Arc<dyn RecordStore>,
    page_size: usize,
}

impl CandidateFetcher {
    pub fn new(store: Arc<dyn RecordStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Reads every range in `bounds`, following continuation tokens.
    ///
    /// Records are merged in range order and deduplicated by id, first
    /// occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns the first range's error only when every range failed.
    pub async fn fetch(&self, bounds: &[KeyRange]) -> Result<FetchOutcome, StoreError> {
        let results = join_all(bounds.iter().map(|range| self.read_range(range))).await;

        let mut outcome = FetchOutcome::default();
        let mut seen = HashSet::new();
        let mut first_error = None;

        for (range, result) in bounds.iter().zip(results) {
            match result {
                Ok(records) => outcome
                    .records
                    .extend(records.into_iter().filter(|r| seen.insert(r.id.clone()))),
                Err(e) => {
                    tracing::warn!(
                        start = %range.start,
                        end = %range.end,
                        error = %e,
                        "key range read failed"
                    );
                    outcome.failed.push(range.clone());
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if outcome.failed.len() == bounds.len() => Err(e),
            _ => Ok(outcome),
        }
    }

    async fn read_range(&self, range: &KeyRange) -> Result<Vec<IndexedRecord>, StoreError> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .store
                .range_query(range, token.as_deref(), self.page_size)
                .await?;
            records.extend(page.records);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(records),
            }
        }
    }

    /// Fetches `bounds`, retrying failed ranges with backoff, and returns the
    /// records inside `query` keyed by id.
    ///
    /// A record read twice across attempts keeps its newest version.
    pub(crate) async fn snapshot(
        &self,
        bounds: &[KeyRange],
        query: &SearchQuery,
        config: &LiveConfig,
    ) -> Result<HashMap<String, IndexedRecord>, LiveError> {
        let mut pending = bounds.to_vec();
        let mut candidates: HashMap<String, IndexedRecord> = HashMap::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last = match self.fetch(&pending).await {
                Ok(outcome) => {
                    let failed = outcome.failed.len();
                    for record in outcome.records {
                        match candidates.get(&record.id) {
                            Some(existing) if existing.version >= record.version => {}
                            _ => {
                                candidates.insert(record.id.clone(), record);
                            }
                        }
                    }
                    if failed == 0 {
                        break;
                    }
                    let total = pending.len();
                    pending = outcome.failed;
                    LiveError::StorePartialFailure { failed, total }
                }
                Err(e) => LiveError::Store(e),
            };

            if attempt >= config.max_init_attempts {
                return Err(LiveError::InitializationFailed {
                    attempts: attempt,
                    last: Box::new(last),
                });
            }
            let delay = config.backoff(attempt);
            tracing::warn!(attempt, ?delay, error = %last, "retrying snapshot ranges");
            tokio::time::sleep(delay).await;
        }

        Ok(refine(candidates.into_values(), query)
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect())
    }
}
