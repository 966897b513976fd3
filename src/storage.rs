use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::GctsError;

pub const SAS_TOKEN_ENV: &str = "AZURE_STORAGE_SAS_TOKEN";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    sas_token: Option<String>,
}

impl Credentials {
    pub fn new(sas_token: Option<String>) -> Self {
        let sas_token = sas_token
            .map(|token| token.trim().trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());
        Self { sas_token }
    }

    pub fn has_token(&self) -> bool {
        self.sas_token.is_some()
    }

    fn sign(&self, url: &str) -> String {
        match &self.sas_token {
            Some(token) if url.contains('?') => format!("{url}&{token}"),
            Some(token) => format!("{url}?{token}"),
            None => url.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait Storage: Send + Sync {
    fn get(&self, location: &str) -> Result<Vec<u8>, GctsError>;
}

#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    credentials: Credentials,
}

impl StorageClient {
    pub fn new(credentials: Credentials) -> Result<Self, GctsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gcts/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GctsError::fetch("<client>", err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| GctsError::fetch("<client>", err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    fn get_http(&self, location: &str) -> Result<Vec<u8>, GctsError> {
        let url = self.credentials.sign(location);
        let response = self.send_with_retries(location, || self.client.get(&url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(GctsError::fetch(location, format!("HTTP status {status}")));
        }
        let bytes = response
            .bytes()
            .map_err(|err| GctsError::fetch(location, redact(&err.to_string())))?;
        Ok(bytes.to_vec())
    }

    fn send_with_retries<F>(
        &self,
        location: &str,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, GctsError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        debug!(location, status, attempt, "retrying storage request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        debug!(location, attempt, "retrying storage request after transport error");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    // reqwest errors embed the full URL, signature included.
                    return Err(GctsError::fetch(location, redact(&err.without_url().to_string())));
                }
            }
        }
    }
}

impl Storage for StorageClient {
    fn get(&self, location: &str) -> Result<Vec<u8>, GctsError> {
        match Scheme::of(location) {
            Scheme::Http => self.get_http(location),
            Scheme::File => {
                let path = file_path(location)?;
                fs::read(&path).map_err(|err| GctsError::fetch(location, err.to_string()))
            }
            Scheme::Other(scheme) => Err(GctsError::fetch(
                location,
                format!("unsupported storage scheme {scheme}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scheme {
    Http,
    File,
    Other(String),
}

impl Scheme {
    fn of(location: &str) -> Self {
        match location.split_once("://") {
            Some((scheme, _)) => match scheme.to_ascii_lowercase().as_str() {
                "http" | "https" => Scheme::Http,
                "file" => Scheme::File,
                other => Scheme::Other(other.to_string()),
            },
            None => Scheme::File,
        }
    }
}

fn file_path(location: &str) -> Result<PathBuf, GctsError> {
    if location.starts_with("file://") {
        let url = Url::parse(location).map_err(|err| GctsError::fetch(location, err.to_string()))?;
        return url
            .to_file_path()
            .map_err(|_| GctsError::fetch(location, "not a local file URL"));
    }
    Ok(PathBuf::from(location))
}

pub fn resolve_href(base: &str, href: &str) -> Result<String, GctsError> {
    if href.contains("://") {
        return Ok(href.to_string());
    }
    if base.contains("://") {
        let base_url = Url::parse(base)
            .map_err(|err| GctsError::CatalogResolution(format!("{base}: {err}")))?;
        let joined = base_url
            .join(href)
            .map_err(|err| GctsError::CatalogResolution(format!("{href}: {err}")))?;
        return Ok(joined.to_string());
    }
    if Path::new(href).is_absolute() {
        return Ok(href.to_string());
    }
    let parent = Path::new(base).parent().unwrap_or_else(|| Path::new(""));
    Ok(normalize(&parent.join(href)).to_string_lossy().into_owned())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn redact(message: &str) -> String {
    match message.find("sig=") {
        Some(start) => {
            let end = message[start..]
                .find(['&', ' ', ')'])
                .map(|offset| start + offset)
                .unwrap_or(message.len());
            format!("{}sig=<redacted>{}", &message[..start], &message[end..])
        }
        None => message.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn credentials_sign_urls() {
        let credentials = Credentials::new(Some("?sv=2024&sig=abc".to_string()));
        assert_eq!(
            credentials.sign("https://host/a.geojson"),
            "https://host/a.geojson?sv=2024&sig=abc"
        );
        assert_eq!(
            credentials.sign("https://host/a.geojson?x=1"),
            "https://host/a.geojson?x=1&sv=2024&sig=abc"
        );
        assert!(!format!("{credentials:?}").contains("abc"));
        assert!(!Credentials::new(Some("  ".to_string())).has_token());
    }

    #[test]
    fn resolve_relative_links() {
        assert_eq!(
            resolve_href("https://host/stac/v1/catalog.json", "./gcts/collection.json").unwrap(),
            "https://host/stac/v1/gcts/collection.json"
        );
        assert_eq!(
            resolve_href("https://host/stac/v1/gcts/collection.json", "../other/item.json")
                .unwrap(),
            "https://host/stac/v1/other/item.json"
        );
        assert_eq!(
            resolve_href("/data/stac/catalog.json", "./gcts/../gcts/collection.json").unwrap(),
            "/data/stac/gcts/collection.json"
        );
        assert_eq!(
            resolve_href("/data/catalog.json", "az://bucket/part.geojson").unwrap(),
            "az://bucket/part.geojson"
        );
    }

    #[test]
    fn redact_hides_signature() {
        assert_eq!(
            redact("error sending request for url (https://h/a?sv=1&sig=SECRET&se=2)"),
            "error sending request for url (https://h/a?sv=1&sig=<redacted>&se=2)"
        );
    }

    #[test]
    fn unsupported_scheme_is_a_fetch_error() {
        let client = StorageClient::new(Credentials::default()).unwrap();
        let err = client.get("s3://bucket/part.geojson").unwrap_err();
        assert_matches!(err, GctsError::PartitionFetch { location, .. } if location == "s3://bucket/part.geojson");
    }

    #[test]
    fn missing_local_file_is_a_fetch_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("missing.geojson");
        let client = StorageClient::new(Credentials::default()).unwrap();
        let err = client.get(path.to_str().unwrap()).unwrap_err();
        assert_matches!(err, GctsError::PartitionFetch { .. });
    }
}
