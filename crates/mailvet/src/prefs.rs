//! The flat, typed preference surface of the engine. Every field has the
//! documented default, so an empty JSON object deserializes to the stock
//! configuration.

use dkim::{TreatAs, UnsignedHeadersMode, VerifyOptions};
use dmarc::NeededPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    pub dkim: DkimPrefs,
    pub key: KeyPrefs,
    pub arh: ArhPrefs,
    pub error: ErrorPrefs,
    pub policy: PolicyPrefs,
}

impl Prefs {
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            rsa_sha1: self.error.rsa_sha1_treat_as,
            weak_rsa_key: self.error.weak_key_treat_as,
            unsigned_headers: self.policy.dkim.unsigned_headers_warning_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DkimPrefs {
    /// gate for the whole engine
    pub enable: bool,
}

impl Default for DkimPrefs {
    fn default() -> Self {
        Self { enable: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoringMode {
    Disabled,
    Store,
    Compare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPrefs {
    pub storing: KeyStoringMode,
}

impl Default for KeyPrefs {
    fn default() -> Self {
        Self {
            storing: KeyStoringMode::Disabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArhPrefs {
    /// read Authentication-Results headers at all
    pub read: bool,
    /// ARH DKIM results replace the local verification
    pub replace_addon_result: bool,
    /// tolerate common grammar violations
    pub relaxed_parsing: bool,
    /// trusted authserv-ids; empty means trust the first one seen
    pub allowed_authserv_ids: Vec<String>,
}

impl Default for ArhPrefs {
    fn default() -> Self {
        Self {
            read: false,
            replace_addon_result: true,
            relaxed_parsing: false,
            allowed_authserv_ids: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPrefs {
    /// error.algorithm.sign.rsa-sha1.treatAs
    pub rsa_sha1_treat_as: TreatAs,
    /// error.algorithm.rsa.weakKeyLength.treatAs
    pub weak_key_treat_as: TreatAs,
}

impl Default for ErrorPrefs {
    fn default() -> Self {
        Self {
            rsa_sha1_treat_as: TreatAs::Warning,
            weak_key_treat_as: TreatAs::Ignore,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPrefs {
    pub sign_rules: SignRulesPrefs,
    pub dmarc: DmarcPrefs,
    pub dkim: PolicyDkimPrefs,
}

/// Which addresses an automatically added rule should cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoAddScope {
    FromAddress,
    Subdomain,
    BaseDomain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignRulesPrefs {
    pub enable: bool,
    pub check_default_rules: bool,
    /// a signature SDID may be a subdomain of the expected SDID
    pub sdid_allow_subdomains: bool,
    /// signed-by-the-wrong-domain handling
    pub wrong_sdid_treat_as: TreatAs,
    pub auto_add_rule: bool,
    pub auto_add_rule_scope: AutoAddScope,
    /// only auto add when the From address lies within the SDID
    pub auto_add_rule_only_if_from_in_sdid: bool,
}

impl Default for SignRulesPrefs {
    fn default() -> Self {
        Self {
            enable: false,
            check_default_rules: true,
            sdid_allow_subdomains: true,
            wrong_sdid_treat_as: TreatAs::Error,
            auto_add_rule: false,
            auto_add_rule_scope: AutoAddScope::FromAddress,
            auto_add_rule_only_if_from_in_sdid: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmarcPrefs {
    /// use DMARC records to decide whether a signature is required
    pub should_be_signed: bool,
    pub needed_policy: NeededPolicy,
}

impl Default for DmarcPrefs {
    fn default() -> Self {
        Self {
            should_be_signed: false,
            needed_policy: NeededPolicy::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDkimPrefs {
    pub unsigned_headers_warning_mode: UnsignedHeadersMode,
}

impl Default for PolicyDkimPrefs {
    fn default() -> Self {
        Self {
            unsigned_headers_warning_mode: UnsignedHeadersMode::Off,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let prefs: Prefs = serde_json::from_str("{}").unwrap();
        assert!(prefs.dkim.enable);
        assert_eq!(prefs.key.storing, KeyStoringMode::Disabled);
        assert!(!prefs.arh.read);
        assert!(prefs.arh.replace_addon_result);
        assert!(!prefs.arh.relaxed_parsing);
        assert_eq!(prefs.error.rsa_sha1_treat_as, TreatAs::Warning);
        assert_eq!(prefs.error.weak_key_treat_as, TreatAs::Ignore);
        assert!(!prefs.policy.sign_rules.enable);
        assert!(prefs.policy.sign_rules.check_default_rules);
        assert!(prefs.policy.sign_rules.sdid_allow_subdomains);
        assert!(!prefs.policy.dmarc.should_be_signed);
        assert_eq!(prefs.policy.dmarc.needed_policy, NeededPolicy::None);
        assert_eq!(
            prefs.policy.dkim.unsigned_headers_warning_mode,
            UnsignedHeadersMode::Off
        );
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let prefs: Prefs =
            serde_json::from_str(r#"{"arh": {"read": true}, "key": {"storing": "compare"}}"#)
                .unwrap();
        assert!(prefs.arh.read);
        assert!(prefs.arh.replace_addon_result);
        assert_eq!(prefs.key.storing, KeyStoringMode::Compare);
        assert!(prefs.dkim.enable);
    }
}
