use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use taxsale_core::error::AppError;
use url::Url;

/// Raw bytes of a document plus whatever the transport said about them.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// The location the bytes came from, after redirects.
    pub location: String,
}

impl FetchedDocument {
    /// Lower-cased file extension of the location path, if any.
    pub fn extension(&self) -> Option<String> {
        let path = match Url::parse(&self.location) {
            Ok(url) if url.scheme() != "file" => url.path().to_string(),
            _ => self.location.clone(),
        };
        Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Loads documents over HTTP(S) or from the local filesystem.
///
/// Locations that parse as `http`/`https` URLs are downloaded with reqwest;
/// `file://` URLs and bare paths are read from disk. Requests to
/// private/reserved IP ranges are blocked unless
/// [`allow_private_urls`](Self::allow_private_urls) is set.
#[derive(Clone)]
pub struct DocumentFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl DocumentFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("taxsale/0.1 (tax sale list reader)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub async fn fetch(&self, location: &str) -> Result<FetchedDocument, AppError> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.fetch_http(url).await,
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| AppError::FetchNotFound(format!("Invalid file URL: {location}")))?;
                read_file(path).await
            }
            Ok(url) if url.scheme().len() > 1 => Err(AppError::HttpError(format!(
                "URL scheme '{}' is not allowed (only http/https/file)",
                url.scheme()
            ))),
            // Bare paths, including Windows drive letters that parse as a scheme.
            _ => read_file(PathBuf::from(location)).await,
        }
    }

    async fn fetch_http(&self, url: Url) -> Result<FetchedDocument, AppError> {
        if self.ssrf_protection {
            validate_host(&url).await?;
        }

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url.as_str()));
        }

        let location = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        tracing::debug!(%location, bytes = bytes.len(), "Fetched document");
        Ok(FetchedDocument {
            bytes: bytes.to_vec(),
            content_type,
            location,
        })
    }
}

/// Maps a non-success status onto the fetch error taxonomy.
fn status_error(status: StatusCode, url: &str) -> AppError {
    let message = format!("HTTP {} for {url}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::FetchDenied(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => AppError::FetchNotFound(message),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitExceeded,
        _ => AppError::HttpError(message),
    }
}

async fn read_file(path: PathBuf) -> Result<FetchedDocument, AppError> {
    let location = path.display().to_string();
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::FetchNotFound(location.clone()),
        std::io::ErrorKind::PermissionDenied => AppError::FetchDenied(location.clone()),
        _ => AppError::Generic(format!("Failed to read {location}: {e}")),
    })?;
    Ok(FetchedDocument {
        bytes,
        content_type: None,
        location,
    })
}

/// Rejects hosts that are, or resolve to, private/reserved addresses.
async fn validate_host(url: &Url) -> Result<(), AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} is a private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::HttpError(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }
    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 (CGN)
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
