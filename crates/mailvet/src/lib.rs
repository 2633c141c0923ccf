//! mailvet ties the verification engine together: preferences, the
//! storage-backed key and rule stores, Authentication-Results ingestion,
//! and the per-message authentication entry point.

mod arh;
mod authenticate;
mod keystore;
mod prefs;
mod rules;
mod storage;
mod wire;

pub use arh::{collect_arh, ArhData, ARH_HEADER_NAME};
pub use authenticate::{AuthError, Authenticator};
pub use keystore::KeyStore;
pub use prefs::{
    ArhPrefs, AutoAddScope, DkimPrefs, DmarcPrefs, ErrorPrefs, KeyPrefs, KeyStoringMode,
    PolicyDkimPrefs, PolicyPrefs, Prefs, SignRulesPrefs,
};
pub use rules::{
    default_rules, select_rule, RuleError, RuleSource, RuleStore, RuleType, SignRule,
    PRIORITY_AUTOINSERT_RULE_ALL, PRIORITY_DEFAULT_RULE_ALL, PRIORITY_USER_INSERT_RULE_ALL,
};
pub use storage::{
    MemoryStorage, Storage, StorageEvent, SCOPE_KEY_STORE, SCOPE_SIGN_RULES_USER,
};
pub use wire::{
    AuthResult, WireAuthResult, WireSignResult, WireWarning, AUTH_RESULT_VERSION,
    SIGN_RESULT_VERSION,
};
