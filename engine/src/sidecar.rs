//! JSON sidecar metadata written next to generated songs.
//!
//! Generation jobs drop a `<id>.json` beside each `<id>.mp3`. Field names
//! drifted over time, so lookups try a few spellings, nested `metas` first.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::track::first_non_empty;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SidecarMeta {
    pub job_id: Option<String>,
    pub created_at_epoch: Option<f64>,
    pub audio_index: i64,
    pub caption: String,
    pub author: String,
    pub title: String,
    /// Basename of `audio_path`, when the sidecar names its mp3.
    #[serde(skip)]
    pub audio_file: Option<String>,
    pub metas: Map<String, Value>,
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or("")
}

fn num_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl SidecarMeta {
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let metas = obj.get("metas").and_then(Value::as_object).cloned().unwrap_or_default();

        let job_id = match obj.get("job_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let audio_file = obj
            .get("audio_path")
            .and_then(Value::as_str)
            .and_then(|p| p.rsplit(|c| c == '/' || c == '\\').next())
            .filter(|bn| bn.to_ascii_lowercase().ends_with(".mp3"))
            .map(str::to_string);

        Some(Self {
            job_id,
            created_at_epoch: num_field(obj, "created_at"),
            audio_index: num_field(obj, "audio_index").map(|x| x as i64).unwrap_or(0),
            caption: str_field(&metas, "caption").to_string(),
            title: first_non_empty([
                str_field(&metas, "title"),
                str_field(&metas, "song_title"),
                str_field(obj, "title"),
                str_field(obj, "song_title"),
            ]),
            author: first_non_empty([
                str_field(&metas, "author"),
                str_field(&metas, "artist"),
                str_field(obj, "author"),
                str_field(obj, "artist"),
            ]),
            audio_file,
            metas,
        })
    }

    /// Unreadable or malformed sidecars count as absent.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read(path).ok()?;
        let v: Value = serde_json::from_slice(&raw).ok()?;
        Self::from_value(&v)
    }

    /// The `<base>.json` next to an audio file.
    pub fn load_beside(audio: &Path) -> Option<Self> {
        Self::load(&audio.with_extension("json"))
    }

    pub fn created_at_display(&self) -> String {
        self.created_at_epoch.map(format_epoch).unwrap_or_default()
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC; empty for out-of-range values.
pub fn format_epoch(epoch: f64) -> String {
    if !epoch.is_finite() {
        return String::new();
    }
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(epoch as i64)
        .ok()
        .and_then(|t| t.format(fmt).ok())
        .unwrap_or_default()
}
