//! AI radio engine: a continuous, server-authoritative playback queue fed from
//! generated songs, a local archive and a remote mp3 mirror.

pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod library;
pub mod mirror;
pub mod mpeg;
pub mod persist;
pub mod probe;
pub mod scheduler;
pub mod sidecar;
pub mod sources;
pub mod ticker;
pub mod track;
