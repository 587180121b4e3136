//! Error types for the radio engine.
//!
//! Probing and mirror failures never reach a listener directly: the scheduler
//! maps them to defaults or to an empty source. They are still typed so the
//! failure path stays visible in signatures and logs.

/// Why a duration probe could not produce a number.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("empty input")]
    Empty,

    #[error("ID3v2 tag ({0} bytes) extends past the probed prefix")]
    TagTruncated(usize),

    #[error("no MPEG frame sync found")]
    NoSync,

    #[error("unsupported MPEG version bits {0:#04b}")]
    UnsupportedVersion(u8),

    #[error("unsupported MPEG layer bits {0:#04b}")]
    UnsupportedLayer(u8),

    #[error("zero sample rate")]
    ZeroSampleRate,

    #[error("zero (free-format) bitrate")]
    ZeroBitrate,

    #[error("no audio bytes after frame start")]
    NoAudio,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("probe task failed: {0}")]
    Join(String),
}

/// Remote directory listing failures.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("remote mirror is not configured")]
    Disabled,

    #[error("invalid remote path: {0}")]
    InvalidPath(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("remote listing HTTP {0}")]
    Status(u16),

    #[error("remote listing fetch failed: {0}")]
    Http(#[from] reqwest::Error),
}
