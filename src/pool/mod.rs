pub mod usage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::config::{ConfigError, CredentialEntry, CredentialsConfig};
use crate::util::unix_now_secs;

pub use usage::{MemoryUsageRecorder, UsageRecorder};

/// One upstream account. Read-mostly; only `last_used` changes while in use.
#[derive(Debug)]
pub struct Credential {
    pub id: String,
    pub session: String,
    pub session_rw: String,
    pub label: Option<String>,
    pub email: Option<String>,
    last_used: AtomicU64,
}

impl Credential {
    #[must_use]
    pub fn new(id: impl Into<String>, session: impl Into<String>, session_rw: Option<String>) -> Self {
        let session = session.into();
        let session_rw = session_rw.unwrap_or_else(|| session.clone());
        Self {
            id: id.into(),
            session,
            session_rw,
            label: None,
            email: None,
            last_used: AtomicU64::new(0),
        }
    }

    /// Unix seconds of the last selection, 0 if never used.
    #[must_use]
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    fn mark_used(&self, now: u64) {
        self.last_used.store(now, Ordering::Relaxed);
    }
}

/// Source of upstream credentials.
pub trait CredentialStore: Send + Sync {
    /// Look up a credential by id.
    fn get(&self, id: &str) -> Option<Arc<Credential>>;

    /// Pick a uniformly random credential whose id is not in `exclude`.
    fn get_random(&self, exclude: &FxHashSet<String>) -> Option<Arc<Credential>>;

    /// Record that a credential was just selected.
    fn touch(&self, id: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process pool built from configuration.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Vec<Arc<Credential>>,
    index: FxHashMap<String, usize>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new(credentials: Vec<Credential>) -> Self {
        let mut store = Self::default();
        for credential in credentials {
            store.insert(credential);
        }
        store
    }

    /// Build the pool from inline entries plus the optional import file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the import file cannot be read, or
    /// [`ConfigError::Validation`] when it contains no usable line.
    pub fn from_config(config: &CredentialsConfig) -> Result<Self, ConfigError> {
        let mut store = Self::default();
        for entry in &config.entries {
            store.insert(credential_from_entry(entry, store.credentials.len()));
        }

        if let Some(path) = config.file.as_deref() {
            let contents = std::fs::read_to_string(path)?;
            let imported = parse_credential_lines(&contents, store.credentials.len());
            if imported.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "credentials file '{path}' contains no credentials"
                )));
            }
            for credential in imported {
                store.insert(credential);
            }
        }

        Ok(store)
    }

    fn insert(&mut self, credential: Credential) {
        if self.index.contains_key(&credential.id) {
            tracing::warn!(credential_id = %credential.id, "duplicate credential id skipped");
            return;
        }
        self.index
            .insert(credential.id.clone(), self.credentials.len());
        self.credentials.push(Arc::new(credential));
    }

    /// All credential ids in import order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.credentials.iter().map(|c| c.id.as_str())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, id: &str) -> Option<Arc<Credential>> {
        self.index
            .get(id)
            .and_then(|&idx| self.credentials.get(idx))
            .cloned()
    }

    fn get_random(&self, exclude: &FxHashSet<String>) -> Option<Arc<Credential>> {
        let candidates: SmallVec<[usize; 16]> = self
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| !exclude.contains(&c.id))
            .map(|(idx, _)| idx)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = candidates[fastrand::usize(..candidates.len())];
        self.credentials.get(pick).cloned()
    }

    fn touch(&self, id: &str) {
        if let Some(credential) = self.get(id) {
            credential.mark_used(unix_now_secs());
        }
    }

    fn len(&self) -> usize {
        self.credentials.len()
    }
}

fn credential_from_entry(entry: &CredentialEntry, position: usize) -> Credential {
    let id = entry
        .id
        .clone()
        .unwrap_or_else(|| generated_credential_id(position));
    let mut credential = Credential::new(id, entry.session.trim(), entry.session_rw.clone());
    credential.label.clone_from(&entry.label);
    credential.email.clone_from(&entry.email);
    credential
}

fn generated_credential_id(position: usize) -> String {
    format!("cred-{}", position + 1)
}

/// Parse bulk-import text: one `session[,session_rw]` per line. Blank lines and
/// `#` comments are skipped. Ids continue from `start`.
#[must_use]
pub fn parse_credential_lines(contents: &str, start: usize) -> Vec<Credential> {
    let mut out = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (session, session_rw) = match line.split_once(',') {
            Some((session, rw)) => {
                let rw = rw.trim();
                (session.trim(), (!rw.is_empty()).then(|| rw.to_string()))
            }
            None => (line, None),
        };
        if session.is_empty() {
            continue;
        }
        out.push(Credential::new(
            generated_credential_id(start + out.len()),
            session,
            session_rw,
        ));
    }
    out
}
