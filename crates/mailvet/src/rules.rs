//! Sign rules: which senders must carry a DKIM signature, and from which
//! domain. Rules come from three sources: the compiled-in default list,
//! the user (persisted in storage), and automatic additions after a
//! verified signature.

use crate::prefs::{AutoAddScope, Prefs};
use crate::storage::{Storage, SCOPE_SIGN_RULES_USER};
use dkim::{DKIMError, SignatureResult, SignatureWarning, TreatAs, Verdict};
use mailparsing::AddrSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub const PRIORITY_AUTOINSERT_RULE_ALL: u32 = 1100;
pub const PRIORITY_DEFAULT_RULE_ALL: u32 = 2100;
pub const PRIORITY_USER_INSERT_RULE_ALL: u32 = 3100;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("a rule with the same identity already exists")]
    Duplicate,
    #[error("invalid rule: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// a signature from one of the expected SDIDs must be present
    All,
    /// the sender is known to mail through relays; alignment warnings
    /// are suppressed
    Neutral,
    /// failing signatures are presented as if there were none
    HideFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// user rules win ties against default rules
    User,
    Default,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRule {
    /// matches the base domain of the From address
    pub domain: Option<String>,
    /// matches the message's List-Id instead of the domain
    pub list_id: Option<String>,
    /// shell style glob over the whole From address, case-insensitive
    pub from_glob: String,
    pub expected_sdids: Vec<String>,
    pub rule_type: RuleType,
    pub priority: u32,
    pub enabled: bool,
    pub source: RuleSource,
}

impl SignRule {
    fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}|{:?}",
            self.domain.as_deref().unwrap_or(""),
            self.list_id.as_deref().unwrap_or(""),
            self.from_glob.to_ascii_lowercase(),
            self.expected_sdids.join(","),
            self.rule_type,
        )
    }

    fn matches(&self, from: &str, from_base_domain: &str, list_id: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        let scope_matches = match (&self.domain, &self.list_id) {
            (Some(domain), _) => domain.eq_ignore_ascii_case(from_base_domain),
            (None, Some(rule_list_id)) => {
                list_id.is_some_and(|id| id.eq_ignore_ascii_case(rule_list_id))
            }
            (None, None) => false,
        };
        scope_matches && glob_matches(&self.from_glob, from)
    }
}

/// Compile a shell style glob (`*` in any position) into an anchored
/// case-insensitive regex and match the whole address against it.
fn glob_matches(glob: &str, text: &str) -> bool {
    let mut pattern = String::from("(?i)^");
    for c in glob.chars() {
        if c == '*' {
            pattern.push_str(".*");
        } else {
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
        }
    }
    pattern.push('$');
    match regex::Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(err) => {
            tracing::warn!("failed to compile glob {glob:?}: {err}");
            false
        }
    }
}

/// Senders that are commonly impersonated and always sign their mail
pub fn default_rules() -> Vec<SignRule> {
    const DOMAINS: &[&str] = &[
        "paypal.com",
        "paypal.de",
        "ebay.com",
        "amazon.com",
        "linkedin.com",
        "facebookmail.com",
    ];
    DOMAINS
        .iter()
        .map(|domain| SignRule {
            domain: Some(domain.to_string()),
            list_id: None,
            from_glob: "*".to_string(),
            expected_sdids: vec![domain.to_string()],
            rule_type: RuleType::All,
            priority: PRIORITY_DEFAULT_RULE_ALL,
            enabled: true,
            source: RuleSource::Default,
        })
        .collect()
}

pub struct RuleStore {
    storage: Arc<dyn Storage>,
}

impl RuleStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn user_rules(&self) -> Vec<SignRule> {
        self.storage
            .list(SCOPE_SIGN_RULES_USER)
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_str(&value) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::warn!("skipping unreadable sign rule {key}: {err}");
                    None
                }
            })
            .collect()
    }

    /// Add a rule; the identity (domain, listId, fromGlob, expectedSdids,
    /// type) must be unique among stored rules.
    pub fn add_rule(&self, rule: SignRule) -> Result<(), RuleError> {
        if rule.domain.is_none() && rule.list_id.is_none() {
            return Err(RuleError::Invalid(
                "a rule needs a domain or a list-id".to_string(),
            ));
        }
        let identity = rule.identity();
        if self.storage.get(SCOPE_SIGN_RULES_USER, &identity).is_some() {
            return Err(RuleError::Duplicate);
        }
        let value = serde_json::to_string(&rule)
            .map_err(|err| RuleError::Invalid(err.to_string()))?;
        self.storage.set(SCOPE_SIGN_RULES_USER, &identity, value);
        Ok(())
    }
}

/// Select the single governing rule for a sender: highest priority wins,
/// the source order (user before default before auto) breaks ties.
pub fn select_rule<'a>(
    rules: &'a [SignRule],
    from: &AddrSpec,
    list_id: Option<&str>,
) -> Option<&'a SignRule> {
    let from_text = from.to_string();
    let base_domain = base_domain_of(&from.domain);
    rules
        .iter()
        .filter(|rule| rule.matches(&from_text, &base_domain, list_id))
        .min_by_key(|rule| (std::cmp::Reverse(rule.priority), rule.source))
}

pub(crate) fn base_domain_of(domain: &str) -> String {
    psl::domain_str(domain)
        .unwrap_or(domain)
        .to_ascii_lowercase()
}

fn sdid_matches(sdid: &str, expected: &[String], allow_subdomains: bool) -> bool {
    expected.iter().any(|candidate| {
        sdid.eq_ignore_ascii_case(candidate)
            || (allow_subdomains
                && sdid
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", candidate.to_ascii_lowercase())))
    })
}

/// Reconcile the verification results with the selected rule: hidden
/// failures, suppressed alignment warnings, or synthetic policy
/// failures.
pub fn apply_rule(results: &mut Vec<SignatureResult>, rule: &SignRule, prefs: &Prefs) {
    match rule.rule_type {
        RuleType::Neutral => {
            for result in results.iter_mut() {
                result
                    .warnings
                    .retain(|w| *w != SignatureWarning::FromNotInSdid);
            }
        }
        RuleType::HideFail => {
            for result in results.iter_mut() {
                if matches!(result.verdict, Verdict::Permfail(_)) {
                    result.verdict = Verdict::None;
                }
            }
        }
        RuleType::All => {
            let allow_subdomains = prefs.policy.sign_rules.sdid_allow_subdomains;
            let has_expected_success = results.iter().any(|r| {
                r.is_success()
                    && r.sdid
                        .as_deref()
                        .is_some_and(|sdid| {
                            sdid_matches(sdid, &rule.expected_sdids, allow_subdomains)
                        })
            });
            if has_expected_success {
                return;
            }

            let mut had_success = false;
            for result in results.iter_mut() {
                if result.is_success() {
                    had_success = true;
                    match prefs.policy.sign_rules.wrong_sdid_treat_as {
                        TreatAs::Error => {
                            result.verdict = Verdict::Permfail(DKIMError::PolicyWrongSdid {
                                got: result.sdid.clone().unwrap_or_default(),
                                expected: rule.expected_sdids.clone(),
                            });
                        }
                        TreatAs::Warning => {
                            result.warnings.push(SignatureWarning::WrongSdid);
                        }
                        TreatAs::Ignore => {}
                    }
                }
            }
            if !had_success {
                results.push(SignatureResult::permfail(
                    DKIMError::PolicyMissingSignature(rule.expected_sdids.clone()),
                ));
            }
        }
    }
}

/// Same synthetic failure, driven by the DMARC heuristic instead of an
/// explicit rule.
pub fn apply_required_sdids(
    results: &mut Vec<SignatureResult>,
    expected_sdids: &[String],
    prefs: &Prefs,
) {
    let allow_subdomains = prefs.policy.sign_rules.sdid_allow_subdomains;
    let satisfied = results.iter().any(|r| {
        r.is_success()
            && r.sdid
                .as_deref()
                .is_some_and(|sdid| sdid_matches(sdid, expected_sdids, allow_subdomains))
    });
    if !satisfied {
        results.push(SignatureResult::permfail(
            DKIMError::PolicyMissingSignature(expected_sdids.to_vec()),
        ));
    }
}

/// After a verified signature, optionally remember that this sender
/// signs their mail.
pub fn maybe_auto_add_rule(
    store: &RuleStore,
    from: &AddrSpec,
    results: &[SignatureResult],
    prefs: &Prefs,
) {
    if !prefs.policy.sign_rules.auto_add_rule {
        return;
    }
    let Some(success) = results.iter().find(|r| r.is_success()) else {
        return;
    };
    let Some(sdid) = success.sdid.clone() else {
        return;
    };
    if prefs.policy.sign_rules.auto_add_rule_only_if_from_in_sdid {
        let from_domain = from.domain.to_ascii_lowercase();
        let in_sdid = from_domain.eq_ignore_ascii_case(&sdid)
            || from_domain.ends_with(&format!(".{}", sdid.to_ascii_lowercase()));
        if !in_sdid {
            return;
        }
    }

    let base = base_domain_of(&from.domain);
    let from_glob = match prefs.policy.sign_rules.auto_add_rule_scope {
        AutoAddScope::FromAddress => from.to_string(),
        AutoAddScope::Subdomain => format!("*@{}", from.domain.to_ascii_lowercase()),
        AutoAddScope::BaseDomain => "*".to_string(),
    };
    let rule = SignRule {
        domain: Some(base),
        list_id: None,
        from_glob,
        expected_sdids: vec![sdid],
        rule_type: RuleType::All,
        priority: PRIORITY_AUTOINSERT_RULE_ALL,
        enabled: true,
        source: RuleSource::Auto,
    };
    match store.add_rule(rule) {
        Ok(()) | Err(RuleError::Duplicate) => {}
        Err(err) => tracing::warn!("failed to auto add sign rule: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn rule(domain: &str, glob: &str, priority: u32, source: RuleSource) -> SignRule {
        SignRule {
            domain: Some(domain.to_string()),
            list_id: None,
            from_glob: glob.to_string(),
            expected_sdids: vec![domain.to_string()],
            rule_type: RuleType::All,
            priority,
            enabled: true,
            source,
        }
    }

    #[test]
    fn glob_semantics() {
        assert!(glob_matches("*", "anyone@example.com"));
        assert!(glob_matches("*@paypal.com", "service@paypal.com"));
        assert!(glob_matches("*@*.example.com", "a@mail.example.com"));
        assert!(glob_matches("Payment*@paypal.com", "payments@paypal.com"));
        assert!(!glob_matches("*@paypal.com", "service@paypal.com.evil.org"));
        // regex metacharacters in the glob are literal
        assert!(!glob_matches("a.b@example.com", "axb@example.com"));
    }

    #[test]
    fn selection_is_deterministic_and_priority_ordered() {
        let from = AddrSpec::new("service", "mail.paypal.com");
        let rules = vec![
            rule("paypal.com", "*", 2100, RuleSource::Default),
            rule("paypal.com", "*", 3100, RuleSource::User),
            rule("paypal.com", "*", 1100, RuleSource::Auto),
        ];
        let selected = select_rule(&rules, &from, None).unwrap();
        assert_eq!(selected.priority, 3100);

        // repeated selection yields the same rule
        for _ in 0..3 {
            assert_eq!(select_rule(&rules, &from, None), Some(selected));
        }
    }

    #[test]
    fn user_beats_default_at_equal_priority() {
        let from = AddrSpec::new("service", "paypal.com");
        let mut user = rule("paypal.com", "*", 2100, RuleSource::User);
        user.expected_sdids = vec!["user.example".to_string()];
        let rules = vec![
            rule("paypal.com", "*", 2100, RuleSource::Default),
            user.clone(),
        ];
        assert_eq!(select_rule(&rules, &from, None), Some(&rules[1]));

        // order in the list does not matter
        let rules = vec![
            user.clone(),
            rule("paypal.com", "*", 2100, RuleSource::Default),
        ];
        assert_eq!(select_rule(&rules, &from, None), Some(&rules[0]));
    }

    #[test]
    fn list_id_rules() {
        let from = AddrSpec::new("poster", "elsewhere.org");
        let list_rule = SignRule {
            domain: None,
            list_id: Some("fans.example.com".to_string()),
            from_glob: "*".to_string(),
            expected_sdids: vec!["example.com".to_string()],
            rule_type: RuleType::Neutral,
            priority: 2100,
            enabled: true,
            source: RuleSource::User,
        };
        let rules = vec![list_rule];
        assert!(select_rule(&rules, &from, Some("fans.example.com")).is_some());
        assert!(select_rule(&rules, &from, Some("other.example.com")).is_none());
        assert!(select_rule(&rules, &from, None).is_none());
    }

    #[test]
    fn disabled_rules_do_not_match() {
        let from = AddrSpec::new("a", "paypal.com");
        let mut r = rule("paypal.com", "*", 2100, RuleSource::User);
        r.enabled = false;
        assert!(select_rule(&[r], &from, None).is_none());
    }

    #[test]
    fn all_rule_synthesizes_missing_sig() {
        let prefs = Prefs::default();
        let r = rule("paypal.com", "*", 2100, RuleSource::Default);
        let mut results = vec![];
        apply_rule(&mut results, &r, &prefs);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].verdict,
            Verdict::Permfail(DKIMError::PolicyMissingSignature(vec![
                "paypal.com".to_string()
            ]))
        );
    }

    fn success(sdid: &str) -> SignatureResult {
        let mut result = SignatureResult::none();
        result.verdict = Verdict::Success;
        result.sdid = Some(sdid.to_string());
        result
    }

    #[test]
    fn all_rule_flags_wrong_sdid() {
        let prefs = Prefs::default();
        let r = rule("paypal.com", "*", 2100, RuleSource::Default);
        let mut results = vec![success("evil.example.org")];
        apply_rule(&mut results, &r, &prefs);
        assert!(matches!(
            results[0].verdict,
            Verdict::Permfail(DKIMError::PolicyWrongSdid { .. })
        ));

        // subdomains of the expected SDID are acceptable by default
        let mut results = vec![success("mail.paypal.com")];
        apply_rule(&mut results, &r, &prefs);
        assert!(results[0].is_success());
    }

    #[test]
    fn hidefail_converts_permfail_to_none() {
        let prefs = Prefs::default();
        let mut r = rule("example.com", "*", 2100, RuleSource::User);
        r.rule_type = RuleType::HideFail;
        let mut results = vec![SignatureResult::permfail(DKIMError::SignatureDidNotVerify)];
        apply_rule(&mut results, &r, &prefs);
        assert_eq!(results[0].verdict, Verdict::None);
    }

    #[test]
    fn neutral_suppresses_alignment_warning() {
        let prefs = Prefs::default();
        let mut r = rule("example.com", "*", 2100, RuleSource::User);
        r.rule_type = RuleType::Neutral;
        let mut result = success("other.org");
        result.warnings.push(SignatureWarning::FromNotInSdid);
        result.warnings.push(SignatureWarning::SmallL);
        let mut results = vec![result];
        apply_rule(&mut results, &r, &prefs);
        assert_eq!(results[0].warnings, vec![SignatureWarning::SmallL]);
    }

    #[test]
    fn store_rejects_duplicate_identity() {
        let store = RuleStore::new(MemoryStorage::new());
        let r = rule("example.com", "*", 3100, RuleSource::User);
        store.add_rule(r.clone()).unwrap();
        assert_eq!(store.add_rule(r), Err(RuleError::Duplicate));
        assert_eq!(store.user_rules().len(), 1);
    }

    #[test]
    fn auto_add_respects_scope() {
        let mut prefs = Prefs::default();
        prefs.policy.sign_rules.auto_add_rule = true;
        prefs.policy.sign_rules.auto_add_rule_scope = AutoAddScope::Subdomain;
        let store = RuleStore::new(MemoryStorage::new());
        let from = AddrSpec::new("joe", "mail.example.com");
        let results = vec![success("example.com")];
        maybe_auto_add_rule(&store, &from, &results, &prefs);

        let rules = store.user_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].from_glob, "*@mail.example.com");
        assert_eq!(rules[0].source, RuleSource::Auto);
        assert_eq!(rules[0].expected_sdids, vec!["example.com".to_string()]);

        // adding again is a no-op
        maybe_auto_add_rule(&store, &from, &results, &prefs);
        assert_eq!(store.user_rules().len(), 1);
    }

    #[test]
    fn auto_add_requires_aligned_from_by_default() {
        let mut prefs = Prefs::default();
        prefs.policy.sign_rules.auto_add_rule = true;
        let store = RuleStore::new(MemoryStorage::new());
        let from = AddrSpec::new("joe", "unrelated.org");
        let results = vec![success("example.com")];
        maybe_auto_add_rule(&store, &from, &results, &prefs);
        assert!(store.user_rules().is_empty());
    }
}
