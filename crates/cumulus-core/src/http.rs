//! HTTP plumbing: JSON API calls and streamed image downloads.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface for the per-source worker threads.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;

/// Read timeout for stall detection (no new chunk within this window = stall)
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("cumulus/", env!("CARGO_PKG_VERSION"));

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Send a prepared request and decode the body as JSON.
///
/// 401/403 map to [`FetchError::Authentication`], 429 to
/// [`FetchError::RateLimited`] (honoring `Retry-After` seconds).
pub fn get_json(request: RequestBuilder) -> Result<serde_json::Value, FetchError> {
    SHARED_RUNTIME.handle().block_on(async {
        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let response = check_status(response, true)?;
        let body = response.text().await.map_err(FetchError::from_reqwest)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Schema(e.to_string()))
    })
}

/// Stream `url` into `dest` via a `.tmp` sibling and an atomic rename.
///
/// Returns the number of bytes written. Rejected credentials on image hosts
/// are item failures here, never [`FetchError::Authentication`].
pub fn download_to(url: &str, dest: &Path, timeout: Duration) -> Result<u64, FetchError> {
    let tmp = tmp_path(dest);
    let result = SHARED_RUNTIME
        .handle()
        .block_on(download_async(url, dest, &tmp, timeout));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

async fn download_async(
    url: &str,
    dest: &Path,
    tmp: &Path,
    timeout: Duration,
) -> Result<u64, FetchError> {
    let response = tokio::time::timeout(timeout, SHARED_CLIENT.get(url).send())
        .await
        .map_err(|_| stall_error(timeout))?
        .map_err(FetchError::from_reqwest)?;
    let mut response = check_status(response, false)?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FetchError::Storage)?;
    }
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(FetchError::Storage)?;

    let mut written = 0u64;
    loop {
        let chunk = match tokio::time::timeout(READ_TIMEOUT, response.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(FetchError::from_reqwest(e)),
            Err(_) => return Err(stall_error(READ_TIMEOUT)),
        };
        file.write_all(&chunk).await.map_err(FetchError::Storage)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(FetchError::Storage)?;
    drop(file);

    tokio::fs::rename(tmp, dest)
        .await
        .map_err(FetchError::Storage)?;
    Ok(written)
}

/// Sibling path used while a file is being written
pub fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn stall_error(after: Duration) -> FetchError {
    FetchError::Network {
        status: None,
        message: format!("read timeout ({}s with no data)", after.as_secs()),
    }
}

fn check_status(response: Response, api: bool) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Err(status_error(status, retry_after, api))
}

/// Classify a non-success status.
fn status_error(status: StatusCode, retry_after: Option<Duration>, api: bool) -> FetchError {
    let code = status.as_u16();
    let message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    match code {
        429 => FetchError::RateLimited { retry_after },
        401 | 403 if api => FetchError::Authentication {
            status: Some(code),
            message,
        },
        _ => FetchError::Network {
            status: Some(code),
            message,
        },
    }
}
