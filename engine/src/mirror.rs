//! Remote directory-listing mirror.
//!
//! A plain HTTP server exposes an autoindex of mp3s. Browsing a folder fetches
//! and parses that HTML once, then serves it from cache. The radio only ever
//! reads what browsing already cached; it never fetches listings on its own.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use tokio::sync::RwLock;
use url::Url;

use crate::error::MirrorError;

/// Virtual folder name the mirror appears under in the archive browser.
pub const MIRROR_KEY: &str = "__xt_music__";

const MIRROR_USER_AGENT: &str = concat!("airadio-engine/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Dir,
    Mp3,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub name: String,
    /// Path inside the virtual folder, e.g. `__xt_music__/Albums/x.mp3`.
    pub path: String,
    /// Absolute URL on the remote server (files only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub base: String,
    pub path: String,
    pub remote: bool,
    pub items: Vec<ListingItem>,
}

/// An mp3 picked from an already-cached listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    pub url: String,
    pub name: String,
}

/// Normalize a path relative to the mirror root. Rejects anything that could
/// escape it.
pub fn sanitize_rel(rel: &str) -> Result<String, MirrorError> {
    let rel = rel.trim().replace('\\', "/");
    let rel = rel.trim_matches('/');
    let rel = match rel.strip_prefix(MIRROR_KEY) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => rel,
    };

    let mut parts = Vec::new();
    for seg in rel.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return Err(MirrorError::InvalidPath(rel.to_string())),
            s if parts.is_empty() && s.contains(':') => {
                return Err(MirrorError::InvalidPath(rel.to_string()));
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).expect("static regex")
    })
}

/// Extract sub-directories and mp3 files below `base` from an autoindex page.
pub fn parse_listing(html: &str, dir_url: &Url, base: &Url) -> Vec<ListingItem> {
    let base_path = base.path();
    let mut items = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for cap in link_regex().captures_iter(html) {
        let href = cap[1].trim();
        let text = cap[2].trim().to_ascii_lowercase();
        if href.is_empty() || href.starts_with('#') || href.starts_with('?') || href.starts_with("../") {
            continue;
        }
        if text == "parent directory" || text == ".." {
            continue;
        }

        let Ok(abs) = dir_url.join(href) else {
            continue;
        };
        if abs.host_str() != base.host_str() || !abs.path().starts_with(base_path) {
            continue;
        }

        let is_dir = abs.path().ends_with('/');
        let inside = &abs.path()[base_path.len()..];
        let inside = urlencoding::decode(inside.trim_matches('/'))
            .map(|s| s.into_owned())
            .unwrap_or_default();
        let Ok(rel) = sanitize_rel(&inside) else {
            continue;
        };
        let Some(name) = rel.rsplit('/').next().filter(|n| !n.is_empty()).map(str::to_string) else {
            continue;
        };
        if !is_dir && !name.to_ascii_lowercase().ends_with(".mp3") {
            continue;
        }
        if !seen.insert((is_dir, rel.clone())) {
            continue;
        }

        items.push(ListingItem {
            kind: if is_dir { ItemKind::Dir } else { ItemKind::Mp3 },
            name,
            path: format!("{MIRROR_KEY}/{rel}"),
            file: (!is_dir).then(|| abs.to_string()),
        });
    }

    items.sort_by(|a, b| (a.kind != ItemKind::Dir, &a.name).cmp(&(b.kind != ItemKind::Dir, &b.name)));
    items
}

pub struct RemoteMirror {
    base: Url,
    client: reqwest::Client,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, Arc<Listing>)>>,
}

impl RemoteMirror {
    pub fn new(base_url: &str, ttl: Duration, timeout: Duration) -> Result<Self, MirrorError> {
        let mut base = Url::parse(base_url.trim())?;
        if !base.path().ends_with('/') {
            let p = format!("{}/", base.path());
            base.set_path(&p);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base,
            client,
            ttl,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Listing for `rel`, from cache when fresh, otherwise fetched.
    pub async fn browse(&self, rel: &str) -> Result<Arc<Listing>, MirrorError> {
        let key = sanitize_rel(rel)?;
        if let Some((at, listing)) = self.cache.read().await.get(&key) {
            if at.elapsed() < self.ttl {
                return Ok(listing.clone());
            }
        }

        let dir_url = if key.is_empty() {
            self.base.clone()
        } else {
            let enc: Vec<String> = key.split('/').map(|s| urlencoding::encode(s).into_owned()).collect();
            self.base.join(&format!("{}/", enc.join("/")))?
        };

        let resp = self
            .client
            .get(dir_url.clone())
            .header(ACCEPT, "text/html,*/*")
            .header(USER_AGENT, MIRROR_USER_AGENT)
            .send()
            .await?;
        if resp.status().as_u16() >= 400 {
            return Err(MirrorError::Status(resp.status().as_u16()));
        }
        let html = resp.text().await?;

        let listing = Arc::new(Listing {
            base: self.base.to_string(),
            path: if key.is_empty() { MIRROR_KEY.to_string() } else { format!("{MIRROR_KEY}/{key}") },
            remote: true,
            items: parse_listing(&html, &dir_url, &self.base),
        });
        tracing::debug!("mirror listing {} -> {} items", dir_url, listing.items.len());

        self.cache.write().await.insert(key, (Instant::now(), listing.clone()));
        Ok(listing)
    }

    /// Random mp3 from any listing fetched so far. Expired listings still count:
    /// the radio must not wait for someone to browse again.
    pub async fn any_cached_track(&self) -> Option<RemoteTrack> {
        let cache = self.cache.read().await;
        let with_mp3s: Vec<&Arc<Listing>> = cache
            .values()
            .map(|(_, l)| l)
            .filter(|l| l.items.iter().any(|i| i.kind == ItemKind::Mp3 && i.file.is_some()))
            .collect();
        if with_mp3s.is_empty() {
            return None;
        }

        let listing = with_mp3s[fastrand::usize(..with_mp3s.len())];
        let mp3s: Vec<&ListingItem> = listing
            .items
            .iter()
            .filter(|i| i.kind == ItemKind::Mp3 && i.file.is_some())
            .collect();
        let item = mp3s[fastrand::usize(..mp3s.len())];
        Some(RemoteTrack {
            url: item.file.clone().unwrap_or_default(),
            name: item.name.clone(),
        })
    }

    pub async fn cached_listing_count(&self) -> usize {
        self.cache.read().await.len()
    }
}
