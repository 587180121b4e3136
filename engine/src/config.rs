//! Engine configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::scheduler::DEFAULT_QUEUE_LEN;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind: SocketAddr,
    pub audio_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Remote mirror base URL; the mirror source is disabled when unset.
    pub mirror_base_url: Option<String>,
    pub queue_len: usize,
    pub tick_every: Duration,
    pub song_refresh_every: Duration,
    pub archive_refresh_every: Duration,
    pub remote_probe_bytes: usize,
    pub remote_timeout: Duration,
    pub mirror_cache_ttl: Duration,
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            audio_dir: PathBuf::from(".cache/acestep/tmp/api_audio"),
            archive_dir: PathBuf::from("archive"),
            mirror_base_url: None,
            queue_len: DEFAULT_QUEUE_LEN,
            tick_every: Duration::from_secs(5),
            song_refresh_every: Duration::from_secs(300),
            archive_refresh_every: Duration::from_secs(600),
            remote_probe_bytes: 128 * 1024,
            remote_timeout: Duration::from_secs(8),
            mirror_cache_ttl: Duration::from_secs(24 * 60 * 60),
            db_path: None,
        }
    }
}

/// Non-empty, trimmed value of `key`.
fn env_str(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_str(get, key) {
        Some(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {key}={v:?}: {e}")),
        None => Ok(default),
    }
}

fn env_secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    let secs: u64 = env_parse(get, key, default.as_secs())?;
    anyhow::ensure!(secs > 0, "{key} must be at least 1 second");
    Ok(Duration::from_secs(secs))
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let queue_len: usize = env_parse(&get, "AIRADIO_QUEUE_LEN", d.queue_len)?;
        anyhow::ensure!(queue_len > 0, "AIRADIO_QUEUE_LEN must be at least 1");

        Ok(Self {
            bind: env_parse(&get, "AIRADIO_BIND", d.bind).context("AIRADIO_BIND")?,
            audio_dir: env_str(&get, "AIRADIO_AUDIO_DIR").map(PathBuf::from).unwrap_or(d.audio_dir),
            archive_dir: env_str(&get, "AIRADIO_ARCHIVE_DIR").map(PathBuf::from).unwrap_or(d.archive_dir),
            mirror_base_url: env_str(&get, "AIRADIO_MIRROR_BASE_URL"),
            queue_len,
            tick_every: env_secs(&get, "AIRADIO_TICK_SECONDS", d.tick_every)?,
            song_refresh_every: env_secs(&get, "AIRADIO_SONG_REFRESH_SECONDS", d.song_refresh_every)?,
            archive_refresh_every: env_secs(&get, "AIRADIO_ARCHIVE_REFRESH_SECONDS", d.archive_refresh_every)?,
            remote_probe_bytes: env_parse(&get, "AIRADIO_REMOTE_PROBE_BYTES", d.remote_probe_bytes)?.max(1024),
            remote_timeout: env_secs(&get, "AIRADIO_REMOTE_TIMEOUT_SECONDS", d.remote_timeout)?,
            mirror_cache_ttl: env_secs(&get, "AIRADIO_MIRROR_CACHE_SECONDS", d.mirror_cache_ttl)?,
            db_path: env_str(&get, "AIRADIO_DB_PATH").map(PathBuf::from),
        })
    }
}
