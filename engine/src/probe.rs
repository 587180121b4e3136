//! Local and remote duration probes built on [`crate::mpeg`].

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use lofty::prelude::AudioFile;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT};

use crate::error::ProbeError;
use crate::mpeg;

/// Prefix read from local files.
pub const LOCAL_PROBE_BYTES: usize = 256 * 1024;

const PROBE_USER_AGENT: &str = concat!("airadio-engine/", env!("CARGO_PKG_VERSION"));

fn read_prefix(path: &Path, offset: u64, limit: usize) -> std::io::Result<(Vec<u8>, u64)> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))?;
    }
    let mut buf = Vec::with_capacity(limit.min(size.saturating_sub(offset) as usize));
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok((buf, size))
}

/// Full-file measurement through lofty. `None` when lofty can't read the
/// file or reports no length.
fn tagged_duration(path: &Path) -> Option<f64> {
    let tagged = lofty::read_from_path(path).ok()?;
    let d = tagged.properties().duration().as_secs_f64();
    (d > 0.0).then_some(d)
}

/// Duration from the file prefix alone.
///
/// An ID3v2 tag can be larger than the prefix (embedded cover art easily
/// passes 256 KiB). In that case read again from the end of the tag and
/// measure the audio that follows it.
fn prefix_duration(path: &Path) -> Result<f64, ProbeError> {
    let (prefix, size) = read_prefix(path, 0, LOCAL_PROBE_BYTES)?;
    match mpeg::parse_prefix(&prefix, size) {
        Err(ProbeError::TagTruncated(end)) if (end as u64) < size => {
            let (audio, _) = read_prefix(path, end as u64, LOCAL_PROBE_BYTES)?;
            mpeg::parse_prefix(&audio, size - end as u64)
        }
        res => res,
    }
}

/// Raw (unclamped) duration of a local file: lofty first, then the prefix
/// parser.
pub async fn local_duration(path: impl Into<PathBuf>) -> Result<f64, ProbeError> {
    let path = path.into();
    // Both paths do blocking file I/O; keep it off the runtime threads.
    tokio::task::spawn_blocking(move || match tagged_duration(&path) {
        Some(d) => Ok(d),
        None => prefix_duration(&path),
    })
    .await
    .map_err(|e| ProbeError::Join(e.to_string()))?
}

/// Ranged remote probing.
///
/// Holds its own `reqwest::Client` so the timeout applies to every request a
/// probe makes, independent of the mirror's listing client.
#[derive(Clone)]
pub struct RemoteProber {
    client: reqwest::Client,
    probe_bytes: usize,
}

impl RemoteProber {
    pub fn new(timeout: Duration, probe_bytes: usize) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, probe_bytes: probe_bytes.max(1) })
    }

    pub fn probe_bytes(&self) -> usize {
        self.probe_bytes
    }

    /// Raw (unclamped) duration of a remote file.
    pub async fn duration(&self, url: &str) -> Result<f64, ProbeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ProbeError::Empty);
        }

        // Some servers reject HEAD; the ranged GET below can still learn the size.
        let mut total: u64 = 0;
        match self.client.head(url).header(USER_AGENT, PROBE_USER_AGENT).send().await {
            Ok(r) if r.status().as_u16() < 400 => {
                total = header_u64(r.headers().get(CONTENT_LENGTH)).unwrap_or(0);
            }
            Ok(r) => tracing::debug!("HEAD {url} -> {}", r.status()),
            Err(e) => tracing::debug!("HEAD {url} failed: {e}"),
        }

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .header(RANGE, format!("bytes=0-{}", self.probe_bytes - 1))
            .send()
            .await?;
        if resp.status().as_u16() >= 400 {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }

        // "bytes 0-131071/7340032"
        if let Some(range_total) = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, t)| t.trim().parse::<u64>().ok())
        {
            total = total.max(range_total);
        }
        if total == 0 {
            total = header_u64(resp.headers().get(CONTENT_LENGTH)).unwrap_or(0);
        }

        // A server that ignores Range sends the whole file; stop at the cap.
        let mut prefix = Vec::with_capacity(self.probe_bytes);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                break;
            }
            let room = self.probe_bytes - prefix.len();
            prefix.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if prefix.len() >= self.probe_bytes {
                break;
            }
        }

        mpeg::parse_prefix(&prefix, total)
    }
}

fn header_u64(v: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    v?.to_str().ok()?.trim().parse().ok()
}
