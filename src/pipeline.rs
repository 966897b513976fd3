use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::catalog::CatalogClient;
use crate::config::ResolvedConfig;
use crate::crs::Crs;
use crate::domain::{CollectionId, PartitionSummary};
use crate::error::GctsError;
use crate::fetcher::{CancellationToken, FetchOptions, PartitionFailure, PartitionFetcher};
use crate::index::PartitionIndex;
use crate::record::QueryResult;
use crate::region::{Bounds, Region};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug)]
pub struct Session {
    catalog_url: String,
    collection: CollectionId,
    fetch: FetchOptions,
    target_crs: Option<Crs>,
    indexes: RwLock<HashMap<(String, CollectionId), Arc<PartitionIndex>>>,
}

impl Session {
    pub fn new(catalog_url: impl Into<String>, collection: CollectionId) -> Self {
        Self {
            catalog_url: catalog_url.into(),
            collection,
            fetch: FetchOptions::default(),
            target_crs: None,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.catalog_url.clone(), config.collection.clone())
            .with_fetch_options(config.fetch)
            .with_target_crs(config.target_crs)
    }

    pub fn with_fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_target_crs(mut self, target_crs: Option<Crs>) -> Self {
        self.target_crs = target_crs;
        self
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub fn fetch_options(&self) -> FetchOptions {
        self.fetch
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport {
    pub collection: String,
    pub region: Bounds,
    pub region_crs: String,
    pub partitions_total: usize,
    pub selected: Vec<PartitionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySummary {
    pub collection: String,
    pub queried_at: String,
    pub region: Bounds,
    pub region_crs: String,
    pub output_crs: String,
    pub failure_policy: String,
    pub boundary: String,
    pub partitions_total: usize,
    pub partitions_selected: Vec<PartitionSummary>,
    pub partitions_fetched: usize,
    pub failures: Vec<PartitionFailure>,
    pub records_scanned: usize,
    pub records: usize,
    pub columns: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QueryReport {
    pub summary: QuerySummary,
    pub result: QueryResult,
}

pub struct Pipeline<C: CatalogClient, S: Storage> {
    session: Session,
    catalog: C,
    storage: S,
}

impl<C: CatalogClient, S: Storage> Pipeline<C, S> {
    pub fn new(session: Session, catalog: C, storage: S) -> Self {
        Self {
            session,
            catalog,
            storage,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn index(&self, sink: &dyn ProgressSink) -> Result<Arc<PartitionIndex>, GctsError> {
        let key = (
            self.session.catalog_url.clone(),
            self.session.collection.clone(),
        );
        if let Some(index) = self
            .session
            .indexes
            .read()
            .map_err(|_| GctsError::CatalogResolution("session cache poisoned".to_string()))?
            .get(&key)
        {
            return Ok(Arc::clone(index));
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; reading catalog {} for {}",
                self.session.catalog_url, self.session.collection
            ),
            elapsed: None,
        });
        let start = Instant::now();
        let collection = self
            .catalog
            .resolve_collection(&self.session.catalog_url, &self.session.collection)?;
        let index = Arc::new(PartitionIndex::from_collection(&collection));
        sink.event(ProgressEvent {
            message: format!("catalog.response partitions={}", index.len()),
            elapsed: Some(start.elapsed()),
        });

        let mut cache = self
            .session
            .indexes
            .write()
            .map_err(|_| GctsError::CatalogResolution("session cache poisoned".to_string()))?;
        Ok(Arc::clone(cache.entry(key).or_insert(index)))
    }

    pub fn partitions(
        &self,
        region: &Region,
        sink: &dyn ProgressSink,
    ) -> Result<SelectionReport, GctsError> {
        let index = self.index(sink)?;
        let selected = index.select(region, self.session.fetch.boundary)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} of {} partitions intersect region",
                selected.len(),
                index.len()
            ),
            elapsed: None,
        });
        Ok(SelectionReport {
            collection: self.session.collection.to_string(),
            region: region.bounds(),
            region_crs: region.crs().to_string(),
            partitions_total: index.len(),
            selected: selected.iter().map(|partition| partition.summary()).collect(),
        })
    }

    pub fn query(
        &self,
        region: &Region,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<QueryReport, GctsError> {
        let start = Instant::now();
        let options = self.session.fetch;
        let target = self.session.target_crs.unwrap_or(region.crs());

        let index = self.index(sink)?;
        let selected = index.select(region, options.boundary)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} of {} partitions intersect region",
                selected.len(),
                index.len()
            ),
            elapsed: None,
        });

        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; reading {} partitions (concurrency={}, policy={})",
                selected.len(),
                options.concurrency,
                options.policy
            ),
            elapsed: None,
        });
        let fetch_start = Instant::now();
        let outcome =
            PartitionFetcher::new(&self.storage, options).fetch(&selected, region, target, cancel)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Filter; kept {} of {} records",
                outcome.result.len(),
                outcome.scanned
            ),
            elapsed: Some(fetch_start.elapsed()),
        });
        for failure in &outcome.failures {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Fetch; skipped {} ({}): {}",
                    failure.partition_id, failure.location, failure.reason
                ),
                elapsed: None,
            });
        }

        let summary = QuerySummary {
            collection: self.session.collection.to_string(),
            queried_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            region: region.bounds(),
            region_crs: region.crs().to_string(),
            output_crs: target.to_string(),
            failure_policy: options.policy.to_string(),
            boundary: options.boundary.to_string(),
            partitions_total: index.len(),
            partitions_selected: selected.iter().map(|partition| partition.summary()).collect(),
            partitions_fetched: outcome.fetched,
            failures: outcome.failures,
            records_scanned: outcome.scanned,
            records: outcome.result.len(),
            columns: outcome.result.columns(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            collection = %summary.collection,
            selected = summary.partitions_selected.len(),
            failed = summary.failures.len(),
            records = summary.records,
            "query complete"
        );

        Ok(QueryReport {
            summary,
            result: outcome.result,
        })
    }
}
