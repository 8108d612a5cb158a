//! Download of original install media with a size-checked local cache.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use super::filesystem::atomic_move;
use crate::error::{BestEffort, Error, Result};

/// Connect timeout for media servers.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The local copy already matched the remote size; nothing was transferred.
    Cached,
    Downloaded { bytes: u64 },
}

pub struct MediaFetcher {
    client: Client,
}

impl MediaFetcher {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }

    /// Fetch `url` into `destination` unless a copy of the same size is
    /// already there.
    ///
    /// `progress` receives `(bytes so far, total if known)` after every chunk.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<FetchOutcome> {
        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::media(
                destination,
                format!("could not access install url {url}: HTTP {status}"),
            ));
        }

        let total = response.content_length();
        if is_cached(destination, total) {
            info!(path = %destination.display(), "original install media available, using cached version");
            return Ok(FetchOutcome::Cached);
        }

        info!(url, path = %destination.display(), "fetching original install media");
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(destination);
        let written = match stream_to(&mut response, &partial, total, progress) {
            Ok(written) => written,
            Err(e) => {
                fs::remove_file(&partial).best_effort("removing partial download");
                return Err(e);
            }
        };

        if written == 0 {
            fs::remove_file(&partial).best_effort("removing empty download");
            return Err(Error::media(destination, "media of 0 size downloaded"));
        }

        atomic_move(&partial, destination)?;
        info!(path = %destination.display(), bytes = written, "media downloaded");
        Ok(FetchOutcome::Downloaded { bytes: written })
    }
}

// Any failure to compare counts as a miss; the worst case is a re-download.
// An empty copy is never a hit, so the zero-size check always runs.
fn is_cached(destination: &Path, remote_len: Option<u64>) -> bool {
    let Some(remote_len) = remote_len else {
        debug!("no Content-Length, cache cannot be validated");
        return false;
    };
    remote_len > 0
        && fs::metadata(destination).is_ok_and(|meta| meta.is_file() && meta.len() == remote_len)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}

fn stream_to(
    body: &mut impl Read,
    path: &Path,
    total: Option<u64>,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<u64> {
    let mut file = File::create(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        written += n as u64;
        progress(written, total);
    }

    file.sync_all()?;
    Ok(written)
}
