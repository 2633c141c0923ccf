//! The versioned result shape handed to consumers. Error and warning
//! types are stable machine-readable strings; turning them into display
//! text is the consumer's job.

use dkim::{SignatureResult, Verdict, VerifiedBy};
use mailparsing::AuthenticationResult;
use serde::Serialize;

pub const AUTH_RESULT_VERSION: &str = "3.1";
pub const SIGN_RESULT_VERSION: &str = "2.1";

/// The complete authentication outcome for one message. `dkim` is
/// ordered best-first and never empty.
#[derive(Debug)]
pub struct AuthResult {
    pub dkim: Vec<SignatureResult>,
    pub spf: Vec<AuthenticationResult>,
    pub dmarc: Vec<AuthenticationResult>,
    pub bimi_indicator: Option<String>,
}

impl AuthResult {
    /// The display-relevant signature result
    pub fn best(&self) -> &SignatureResult {
        &self.dkim[0]
    }

    pub fn to_wire(&self) -> WireAuthResult {
        WireAuthResult {
            version: AUTH_RESULT_VERSION,
            dkim: self.dkim.iter().map(WireSignResult::from).collect(),
            spf: if self.spf.is_empty() {
                None
            } else {
                Some(self.spf.clone())
            },
            dmarc: if self.dmarc.is_empty() {
                None
            } else {
                Some(self.dmarc.clone())
            },
            bimi_indicator: self.bimi_indicator.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAuthResult {
    pub version: &'static str,
    pub dkim: Vec<WireSignResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spf: Option<Vec<AuthenticationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dmarc: Option<Vec<AuthenticationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bimi_indicator: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSignResult {
    pub version: &'static str,
    /// none | SUCCESS | PERMFAIL | TEMPFAIL
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<&'static str>,
    pub warnings: Vec<WireWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_signature: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_hash: Option<&'static str>,
    pub key_secure: bool,
    pub verified_by: &'static str,
    pub signed_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireWarning {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl From<&SignatureResult> for WireSignResult {
    fn from(result: &SignatureResult) -> Self {
        let (verdict, error_type) = match &result.verdict {
            Verdict::None => ("none", None),
            Verdict::Success => ("SUCCESS", None),
            Verdict::Permfail(err) => ("PERMFAIL", Some(err.error_type())),
            Verdict::Tempfail(err) => ("TEMPFAIL", Some(err.error_type())),
        };
        Self {
            version: SIGN_RESULT_VERSION,
            result: verdict,
            sdid: result.sdid.clone(),
            auid: result.auid.clone(),
            selector: result.selector.clone(),
            error_type,
            warnings: result
                .warnings
                .iter()
                .map(|w| WireWarning {
                    name: w.warning_type(),
                    param: w.param().map(|p| p.to_string()),
                })
                .collect(),
            algorithm_signature: result.algorithm.map(|a| a.name()),
            algorithm_hash: result.hash_algorithm.map(|a| a.name()),
            key_secure: result.key_secure,
            verified_by: match result.verified_by {
                VerifiedBy::DkimVerifier => "dkimVerifier",
                VerifiedBy::AuthResultHeader => "authenticationResultsHeader",
            },
            signed_headers: result.signed_headers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkim::DKIMError;

    #[test]
    fn wire_shape_is_versioned() {
        let auth = AuthResult {
            dkim: vec![SignatureResult::permfail(DKIMError::BodyHashDidNotVerify)],
            spf: vec![],
            dmarc: vec![],
            bimi_indicator: None,
        };
        let value = serde_json::to_value(auth.to_wire()).unwrap();
        k9::assert_equal!(value["version"].as_str(), Some("3.1"));
        k9::assert_equal!(value["dkim"][0]["version"].as_str(), Some("2.1"));
        k9::assert_equal!(value["dkim"][0]["result"].as_str(), Some("PERMFAIL"));
        k9::assert_equal!(
            value["dkim"][0]["errorType"].as_str(),
            Some("DKIM_SIGERROR_CORRUPT_BH")
        );
        assert!(value.get("spf").is_none());
    }
}
