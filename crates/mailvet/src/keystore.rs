//! The caching key store: a content-addressed map from (sdid, selector)
//! to the key record, layered over DNS retrieval. Three modes: pass
//! through, cache, or live-query-and-compare (detecting keys that change
//! behind a previously seen message).

use crate::prefs::KeyStoringMode;
use crate::storage::{Storage, SCOPE_KEY_STORE};
use async_trait::async_trait;
use dkim::{DKIMError, DkimKeyRecord, DnsKeySource, KeySource, RetrievedKey};
use dns_resolver::Resolver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyCacheEntry {
    sdid: String,
    selector: String,
    /// TXT RDATA as retrieved
    key: String,
    /// retrieved over DNSSEC, or affirmed by the user
    secure: bool,
    inserted_at: i64,
    last_used_at: i64,
}

fn entry_key(sdid: &str, selector: &str) -> String {
    format!("{}:{}", sdid.to_ascii_lowercase(), selector)
}

pub struct KeyStore<'a> {
    mode: KeyStoringMode,
    storage: Arc<dyn Storage>,
    resolver: &'a dyn Resolver,
}

impl<'a> KeyStore<'a> {
    pub fn new(mode: KeyStoringMode, storage: Arc<dyn Storage>, resolver: &'a dyn Resolver) -> Self {
        Self {
            mode,
            storage,
            resolver,
        }
    }

    fn load(&self, sdid: &str, selector: &str) -> Option<KeyCacheEntry> {
        let value = self.storage.get(SCOPE_KEY_STORE, &entry_key(sdid, selector))?;
        match serde_json::from_str(&value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("discarding unreadable key cache entry for {sdid}/{selector}: {err}");
                None
            }
        }
    }

    fn save(&self, entry: &KeyCacheEntry) {
        match serde_json::to_string(entry) {
            Ok(value) => {
                self.storage
                    .set(SCOPE_KEY_STORE, &entry_key(&entry.sdid, &entry.selector), value)
            }
            Err(err) => tracing::warn!("failed to serialize key cache entry: {err}"),
        }
    }

    /// Mark a cached key as user-affirmed. Such entries are only
    /// replaced by an explicit `clear_key`.
    pub fn mark_secure(&self, sdid: &str, selector: &str) {
        if let Some(mut entry) = self.load(sdid, selector) {
            entry.secure = true;
            self.save(&entry);
        }
    }

    pub fn clear_key(&self, sdid: &str, selector: &str) {
        self.storage
            .delete(SCOPE_KEY_STORE, &entry_key(sdid, selector));
    }

    pub fn clear_all(&self) {
        self.storage.clear(SCOPE_KEY_STORE);
    }

    async fn fetch_live(&self, sdid: &str, selector: &str) -> Result<RetrievedKey, DKIMError> {
        DnsKeySource::new(self.resolver)
            .fetch_key(sdid, selector)
            .await
    }

    fn store_entry(&self, sdid: &str, selector: &str, key: &RetrievedKey) {
        let now = chrono::Utc::now().timestamp();
        self.save(&KeyCacheEntry {
            sdid: sdid.to_ascii_lowercase(),
            selector: selector.to_string(),
            key: key.record.raw.clone(),
            secure: key.secure,
            inserted_at: now,
            last_used_at: now,
        });
    }
}

#[async_trait]
impl KeySource for KeyStore<'_> {
    async fn fetch_key(&self, sdid: &str, selector: &str) -> Result<RetrievedKey, DKIMError> {
        match self.mode {
            KeyStoringMode::Disabled => self.fetch_live(sdid, selector).await,
            KeyStoringMode::Store => {
                if let Some(mut entry) = self.load(sdid, selector) {
                    let record = DkimKeyRecord::parse(&entry.key)?;
                    entry.last_used_at = chrono::Utc::now().timestamp();
                    let secure = entry.secure;
                    self.save(&entry);
                    return Ok(RetrievedKey { record, secure });
                }
                let key = self.fetch_live(sdid, selector).await?;
                self.store_entry(sdid, selector, &key);
                Ok(key)
            }
            KeyStoringMode::Compare => {
                let live = self.fetch_live(sdid, selector).await?;
                match self.load(sdid, selector) {
                    Some(mut entry) => {
                        if entry.key != live.record.raw {
                            tracing::warn!(
                                "key for {sdid}/{selector} differs from the stored one"
                            );
                            return Err(DKIMError::KeyMismatch);
                        }
                        entry.last_used_at = chrono::Utc::now().timestamp();
                        let secure = entry.secure || live.secure;
                        self.save(&entry);
                        Ok(RetrievedKey {
                            record: live.record,
                            secure,
                        })
                    }
                    None => {
                        self.store_entry(sdid, selector, &live);
                        Ok(live)
                    }
                }
            }
        }
    }
}
