//! The keyed storage contract. The engine reserves two scopes for
//! non-preference data: `keyStore` for the public key cache and
//! `signRulesUser` for user sign rules. Persistence lives behind this
//! trait; the in-memory implementation backs tests and ephemeral use.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const SCOPE_KEY_STORE: &str = "keyStore";
pub const SCOPE_SIGN_RULES_USER: &str = "signRulesUser";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub scope: String,
    pub key: String,
}

pub trait Storage: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> Option<String>;
    fn set(&self, scope: &str, key: &str, value: String);
    fn delete(&self, scope: &str, key: &str);
    fn clear(&self, scope: &str);
    /// All (key, value) pairs of a scope, in key order
    fn list(&self, scope: &str) -> Vec<(String, String)>;
    /// Change notifications; every set/delete/clear emits one event
    fn watch(&self) -> broadcast::Receiver<StorageEvent>;
}

pub struct MemoryStorage {
    values: Mutex<BTreeMap<(String, String), String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            values: Mutex::new(BTreeMap::new()),
            events,
        })
    }

    fn notify(&self, scope: &str, key: &str) {
        // nobody listening is fine
        self.events
            .send(StorageEvent {
                scope: scope.to_string(),
                key: key.to_string(),
            })
            .ok();
    }
}

impl Storage for MemoryStorage {
    fn get(&self, scope: &str, key: &str) -> Option<String> {
        self.values
            .lock()
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&self, scope: &str, key: &str, value: String) {
        self.values
            .lock()
            .insert((scope.to_string(), key.to_string()), value);
        self.notify(scope, key);
    }

    fn delete(&self, scope: &str, key: &str) {
        self.values
            .lock()
            .remove(&(scope.to_string(), key.to_string()));
        self.notify(scope, key);
    }

    fn clear(&self, scope: &str) {
        self.values
            .lock()
            .retain(|(entry_scope, _), _| entry_scope != scope);
        self.notify(scope, "");
    }

    fn list(&self, scope: &str) -> Vec<(String, String)> {
        self.values
            .lock()
            .iter()
            .filter(|((entry_scope, _), _)| entry_scope == scope)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect()
    }

    fn watch(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
