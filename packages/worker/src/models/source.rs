use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::DownloadOptions;
use crate::error::ProcessingError;

/// Copy the object behind `url` to `dest`, streaming.
///
/// `file://` URLs point into a volume shared with the content store; anything
/// served over HTTP(S) is downloaded with a redirect cap and a size cap.
pub async fn fetch(url: &str, dest: &Path, opts: &DownloadOptions) -> Result<u64, ProcessingError> {
    if let Some(path) = url.strip_prefix("file://") {
        let copied = tokio::fs::copy(path, dest)
            .await
            .map_err(|e| ProcessingError::Download(format!("cannot read {path}: {e}")))?;
        if copied > opts.max_bytes {
            return Err(ProcessingError::Download(format!(
                "source is {copied} bytes, limit is {}",
                opts.max_bytes
            )));
        }
        return Ok(copied);
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return download(url, dest, opts).await;
    }

    Err(ProcessingError::Download(format!(
        "unsupported source url: {url}"
    )))
}

async fn download(url: &str, dest: &Path, opts: &DownloadOptions) -> Result<u64, ProcessingError> {
    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::limited(opts.max_redirects))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| ProcessingError::Download(e.to_string()))?;

    let response = client.get(url).send().await.map_err(request_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProcessingError::Download(format!(
            "GET {url} returned {status}"
        )));
    }

    let mut file = File::create(dest).await?;
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(request_error)?;
        written += chunk.len() as u64;
        if written > opts.max_bytes {
            return Err(ProcessingError::Download(format!(
                "source exceeds {} bytes",
                opts.max_bytes
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(url, bytes = written, "Downloaded source");
    Ok(written)
}

fn request_error(e: reqwest::Error) -> ProcessingError {
    if e.is_redirect() {
        ProcessingError::Download(format!("redirect loop: {e}"))
    } else {
        ProcessingError::Download(e.to_string())
    }
}
