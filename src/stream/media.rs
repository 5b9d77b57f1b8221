//! Media reference discovery in decoded upstream documents.
//!
//! Only values under an allow-listed key are considered, and traversal stops
//! at [`MAX_DEPTH`] levels of nesting. Relative asset paths are made absolute
//! against the asset host. When a public base URL is configured, asset-host
//! URLs are rewritten to go through the gateway's `/assets/` proxy.

use serde_json::Value;
use smallvec::SmallVec;

use crate::util::join_url;

pub const MAX_DEPTH: usize = 32;

const MEDIA_KEYS: &[&str] = &[
    "imageUrl",
    "imageUrls",
    "generatedImageUrls",
    "videoUrl",
    "videoUrls",
    "assetUrl",
    "mediaUrl",
];

#[derive(Debug, Clone)]
pub struct MediaExtractor {
    asset_host: String,
    public_base_url: Option<String>,
}

impl MediaExtractor {
    #[must_use]
    pub fn new(asset_host: &str, public_base_url: Option<&str>) -> Self {
        Self {
            asset_host: asset_host.trim_end_matches('/').to_string(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Absolute media URLs in discovery order, without duplicates.
    #[must_use]
    pub fn extract(&self, value: &Value) -> Vec<String> {
        let mut found: SmallVec<[String; 4]> = SmallVec::new();
        self.visit(value, 0, &mut found);
        found.into_vec()
    }

    /// Map an asset-host URL to its path below the host, if it is one.
    #[must_use]
    pub fn asset_path<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.asset_host.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    #[must_use]
    pub fn asset_host(&self) -> &str {
        &self.asset_host
    }

    fn visit(&self, value: &Value, depth: usize, out: &mut SmallVec<[String; 4]>) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if MEDIA_KEYS.contains(&key.as_str()) {
                        self.collect(child, out);
                    } else {
                        self.visit(child, depth + 1, out);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.visit(item, depth + 1, out);
                }
            }
            _ => {}
        }
    }

    fn collect(&self, value: &Value, out: &mut SmallVec<[String; 4]>) {
        let mut push = |raw: &str| {
            if let Some(url) = self.resolve(raw) {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
        };
        match value {
            Value::String(raw) => push(raw),
            Value::Array(items) => {
                for item in items {
                    if let Value::String(raw) = item {
                        push(raw);
                    }
                }
            }
            _ => {}
        }
    }

    /// Absolute (and possibly republished) form of one raw reference, or `None`
    /// when it is neither a URL nor a plausible asset path.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let absolute = if raw.starts_with("https://") || raw.starts_with("http://") {
            raw.to_string()
        } else if is_relative_asset_path(raw) {
            join_url(&self.asset_host, raw)
        } else {
            return None;
        };
        Some(self.publish(absolute))
    }

    fn publish(&self, absolute: String) -> String {
        let Some(public) = self.public_base_url.as_deref() else {
            return absolute;
        };
        match self.asset_path(&absolute) {
            Some(path) => {
                let mut out = String::with_capacity(public.len() + 8 + path.len());
                out.push_str(public);
                out.push_str("/assets/");
                out.push_str(path);
                out
            }
            None => absolute,
        }
    }
}

fn is_relative_asset_path(raw: &str) -> bool {
    if raw.is_empty() || raw.contains("://") || raw.starts_with("data:") || raw.starts_with("//")
    {
        return false;
    }
    let path = raw.trim_start_matches('/');
    !path.is_empty()
        && path.contains('/')
        && path
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-._~/%?=&+".contains(&b))
}
