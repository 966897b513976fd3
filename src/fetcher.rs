use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::crs::Crs;
use crate::domain::Partition;
use crate::error::GctsError;
use crate::index::BoundaryRule;
use crate::record::{QueryResult, Record};
use crate::region::Region;
use crate::storage::Storage;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    FailFast,
    #[default]
    SkipAndWarn,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::SkipAndWarn => write!(f, "skip-and-warn"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "skip-and-warn" | "skip" => Ok(FailurePolicy::SkipAndWarn),
            _ => Err(GctsError::InvalidPolicy(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub policy: FailurePolicy,
    pub boundary: BoundaryRule,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            policy: FailurePolicy::default(),
            boundary: BoundaryRule::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionFailure {
    pub partition_id: String,
    pub location: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub result: QueryResult,
    pub failures: Vec<PartitionFailure>,
    pub fetched: usize,
    pub scanned: usize,
}

struct PartitionRecords {
    records: Vec<Record>,
    scanned: usize,
}

pub struct PartitionFetcher<'a, S: Storage> {
    storage: &'a S,
    options: FetchOptions,
}

impl<'a, S: Storage> PartitionFetcher<'a, S> {
    pub fn new(storage: &'a S, options: FetchOptions) -> Self {
        Self { storage, options }
    }

    pub fn fetch(
        &self,
        partitions: &[&Partition],
        region: &Region,
        target: Crs,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, GctsError> {
        if cancel.is_cancelled() {
            return Err(GctsError::Cancelled);
        }
        if partitions.is_empty() {
            return Ok(FetchOutcome {
                result: QueryResult::empty(target),
                failures: Vec::new(),
                fetched: 0,
                scanned: 0,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|index| format!("gcts-fetch-{index}"))
            .build()
            .map_err(|err| GctsError::WorkerPool(err.to_string()))?;

        let abort = AtomicBool::new(false);
        let start = Instant::now();
        let outcomes = pool.install(|| {
            partitions
                .par_iter()
                .map(|partition| {
                    if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                        return None;
                    }
                    let outcome = self.fetch_one(partition, region, target);
                    if outcome.is_err() && self.options.policy == FailurePolicy::FailFast {
                        abort.store(true, Ordering::SeqCst);
                    }
                    Some(outcome)
                })
                .collect::<Vec<_>>()
        });

        if cancel.is_cancelled() {
            warn!(partitions = partitions.len(), "query cancelled; discarding fetched partitions");
            return Err(GctsError::Cancelled);
        }

        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut fetched = 0usize;
        let mut scanned = 0usize;
        for (partition, outcome) in partitions.iter().zip(outcomes) {
            match outcome {
                Some(Ok(batch)) => {
                    fetched += 1;
                    scanned += batch.scanned;
                    records.extend(batch.records);
                }
                Some(Err(err)) => {
                    let reason = failure_reason(err);
                    match self.options.policy {
                        FailurePolicy::FailFast => {
                            return Err(GctsError::fetch(partition.location(), reason));
                        }
                        FailurePolicy::SkipAndWarn => {
                            warn!(
                                partition = partition.id(),
                                location = partition.location(),
                                reason = %reason,
                                "skipping unreadable partition"
                            );
                            failures.push(PartitionFailure {
                                partition_id: partition.id().to_string(),
                                location: partition.location().to_string(),
                                reason,
                            });
                        }
                    }
                }
                // Only reachable once a fail-fast abort was raised, which returns above.
                None => {}
            }
        }

        info!(
            fetched,
            failed = failures.len(),
            scanned,
            kept = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "partition fetch complete"
        );
        Ok(FetchOutcome {
            result: QueryResult::new(target, records),
            failures,
            fetched,
            scanned,
        })
    }

    fn fetch_one(
        &self,
        partition: &Partition,
        region: &Region,
        target: Crs,
    ) -> Result<PartitionRecords, GctsError> {
        let location = partition.location();
        let bytes = self.storage.get(location)?;
        let decoded = codec::decode_partition(location, &bytes)?;
        let source = decoded.crs.unwrap_or(partition.crs());
        let scanned = decoded.features.len();

        let mut records = Vec::new();
        for feature in decoded.features {
            let geometry = match source.transform_geometry(&region.crs(), &feature.geometry) {
                Ok(geometry) => geometry,
                Err(err) => {
                    debug!(
                        partition = partition.id(),
                        error = %err,
                        "discarding record outside region CRS"
                    );
                    continue;
                }
            };
            if !self.options.boundary.matches(&geometry, region.shape()) {
                continue;
            }
            let geometry = match region.crs().transform_geometry(&target, &geometry) {
                Ok(geometry) => geometry,
                Err(err) => {
                    debug!(
                        partition = partition.id(),
                        error = %err,
                        "discarding record outside target CRS"
                    );
                    continue;
                }
            };
            records.push(Record::new(partition.id(), geometry, feature.properties));
        }

        debug!(
            partition = partition.id(),
            scanned,
            kept = records.len(),
            "partition filtered"
        );
        Ok(PartitionRecords { records, scanned })
    }
}

fn failure_reason(err: GctsError) -> String {
    match err {
        GctsError::PartitionFetch { reason, .. } => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::region::Bounds;

    #[test]
    fn parse_failure_policy() {
        assert_eq!(
            "skip_and_warn".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::SkipAndWarn
        );
        assert_eq!(
            "Fail-Fast".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::FailFast
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn default_policy_is_skip_and_warn() {
        assert_eq!(FetchOptions::default().policy, FailurePolicy::SkipAndWarn);
        assert_eq!(FetchOptions::default().concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    struct NoStorage;

    impl Storage for NoStorage {
        fn get(&self, location: &str) -> Result<Vec<u8>, GctsError> {
            Err(GctsError::fetch(location, "unexpected read"))
        }
    }

    #[test]
    fn cancelled_token_wins_over_empty_selection() {
        let token = CancellationToken::new();
        token.cancel();
        let region = Region::from_bounds(Bounds::new(0.0, 0.0, 1.0, 1.0), Crs::Wgs84).unwrap();
        let fetcher = PartitionFetcher::new(&NoStorage, FetchOptions::default());

        let err = fetcher.fetch(&[], &region, Crs::Wgs84, &token).unwrap_err();
        assert_matches!(err, GctsError::Cancelled);
    }
}
