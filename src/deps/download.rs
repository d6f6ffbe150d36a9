//! Blocking artifact download with retries and atomic placement.
//!
//! Bytes stream into a `.download` temp file that is renamed over the
//! destination only after the size check passes, so an interrupted transfer
//! never leaves a usable artifact behind.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use super::DepsError;

const MAX_RETRIES: usize = 3;
const RETRY_BACKOFF_SECS: u64 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> Result<reqwest::blocking::Client, DepsError> {
    reqwest::blocking::Client::builder()
        .connect_timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| DepsError::AcquireFailed(format!("http client: {e}")))
}

/// Downloads `url` to `dest`, reporting per-file fractional progress in
/// `[0.0, 1.0]` through `progress`.
pub(crate) fn download_file<F>(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
    progress: &F,
) -> Result<(), DepsError>
where
    F: Fn(f64),
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_err(parent, e))?;
    }

    let tmp = dest.with_extension("download");
    let mut last_err: Option<DepsError> = None;

    for attempt in 1..=MAX_RETRIES {
        if tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }

        log::info!("Downloading {url} to {} (attempt {attempt}/{MAX_RETRIES})", dest.display());

        match try_download_once(client, url, &tmp, dest, progress) {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::warn!("Download attempt {attempt} failed: {err}");
                last_err = Some(err);

                if attempt < MAX_RETRIES {
                    std::thread::sleep(Duration::from_secs(RETRY_BACKOFF_SECS * attempt as u64));
                } else if tmp.exists() {
                    let _ = fs::remove_file(&tmp);
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| DepsError::AcquireFailed(format!("{url}: failed to download"))))
}

fn try_download_once<F>(
    client: &reqwest::blocking::Client,
    url: &str,
    tmp: &Path,
    dest: &Path,
    progress: &F,
) -> Result<(), DepsError>
where
    F: Fn(f64),
{
    let response = client
        .get(url)
        .send()
        .map_err(|e| DepsError::AcquireFailed(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(DepsError::AcquireFailed(format!(
            "{url}: unexpected status {status}"
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = fs::File::create(tmp).map_err(|e| storage_err(tmp, e))?;
    let mut reader = response;
    let mut buffer = [0; 8192];

    progress(0.0);
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| DepsError::AcquireFailed(format!("{url}: read failed: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .map_err(|e| DepsError::AcquireFailed(format!("{url}: write failed: {e}")))?;

        downloaded += bytes_read as u64;
        if total_size > 0 {
            progress((downloaded as f64 / total_size as f64).min(1.0));
        }
    }

    if total_size > 0 && downloaded != total_size {
        return Err(DepsError::AcquireFailed(format!(
            "{url}: incomplete download, expected {total_size} bytes, got {downloaded}"
        )));
    }

    file.flush().map_err(|e| storage_err(tmp, e))?;
    drop(file);
    fs::rename(tmp, dest).map_err(|e| storage_err(dest, e))?;
    progress(1.0);
    Ok(())
}

/// Storage trouble mid-acquisition is an acquisition failure, not a
/// generic io error.
fn storage_err(path: &Path, err: std::io::Error) -> DepsError {
    DepsError::AcquireFailed(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_surface_as_acquisition_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("write");

        // The destination's parent is a regular file, so directory creation
        // fails before any request is sent.
        let client = http_client().expect("client");
        let dest = blocker.join("ffmpeg");
        let err = download_file(&client, "http://unreachable.invalid/ffmpeg", &dest, &|_| {})
            .expect_err("must fail");
        assert!(matches!(err, DepsError::AcquireFailed(_)));
    }
}
