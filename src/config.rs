use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::domain::CollectionId;
use crate::error::GctsError;
use crate::fetcher::{DEFAULT_CONCURRENCY, FailurePolicy, FetchOptions};
use crate::index::BoundaryRule;
use crate::storage::{Credentials, SAS_TOKEN_ENV};

pub const CONFIG_FILE: &str = "gcts.json";
pub const DEFAULT_CATALOG_URL: &str = "https://coclico.blob.core.windows.net/stac/v1/catalog.json";
pub const DEFAULT_COLLECTION: &str = "gcts";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub boundary: Option<BoundaryRule>,
    #[serde(default)]
    pub region_crs: Option<Crs>,
    #[serde(default)]
    pub target_crs: Option<Crs>,
    #[serde(default)]
    pub sas_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog_url: String,
    pub collection: CollectionId,
    pub fetch: FetchOptions,
    pub region_crs: Crs,
    pub target_crs: Option<Crs>,
    pub credentials: Credentials,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GctsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| GctsError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| GctsError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, std::env::var(SAS_TOKEN_ENV).ok())
    }

    // The environment token, when set, wins over one stored in the file.
    pub fn resolve_config(
        config: Config,
        env_token: Option<String>,
    ) -> Result<ResolvedConfig, GctsError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(GctsError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(GctsError::ConfigParse(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let collection: CollectionId = config
            .collection
            .as_deref()
            .unwrap_or(DEFAULT_COLLECTION)
            .parse()?;

        let token = env_token
            .filter(|token| !token.trim().is_empty())
            .or(config.sas_token);

        Ok(ResolvedConfig {
            schema_version,
            catalog_url: config
                .catalog_url
                .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            collection,
            fetch: FetchOptions {
                concurrency,
                policy: config.failure_policy.unwrap_or_default(),
                boundary: config.boundary.unwrap_or_default(),
            },
            region_crs: config.region_crs.unwrap_or_default(),
            target_crs: config.target_crs,
            credentials: Credentials::new(token),
        })
    }
}
