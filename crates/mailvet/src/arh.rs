//! Ingestion of Authentication-Results headers added by a trusted
//! upstream MTA: select trustworthy headers, convert their DKIM entries
//! into signature results, and carry SPF/DMARC/BIMI information along.

use crate::prefs::Prefs;
use dkim::{
    DKIMError, HashAlgorithm, SignatureAlgorithm, SignatureResult, SignatureWarning, TreatAs,
    Verdict, VerifiedBy,
};
use mailparsing::{AuthenticationResult, Message, ParseMode};

pub const ARH_HEADER_NAME: &str = "Authentication-Results";
const BIMI_INDICATOR_HEADER_NAME: &str = "BIMI-Indicator";

#[derive(Debug, Default)]
pub struct ArhData {
    pub dkim: Vec<SignatureResult>,
    pub spf: Vec<AuthenticationResult>,
    pub dmarc: Vec<AuthenticationResult>,
    pub bimi_indicator: Option<String>,
}

fn domain_within(domain: &str, zone: &str) -> bool {
    domain.eq_ignore_ascii_case(zone)
        || domain
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", zone.to_ascii_lowercase()))
}

fn parse_algorithm(value: &str) -> Option<(SignatureAlgorithm, HashAlgorithm)> {
    match value {
        "rsa-sha1" => Some((SignatureAlgorithm::Rsa, HashAlgorithm::Sha1)),
        "rsa-sha256" => Some((SignatureAlgorithm::Rsa, HashAlgorithm::Sha256)),
        "ed25519-sha256" => Some((SignatureAlgorithm::Ed25519, HashAlgorithm::Sha256)),
        _ => None,
    }
}

/// Convert one ARH dkim resinfo into a signature result. Entries that
/// fail the sanity checks yield None: an upstream header, forged or
/// buggy, must not manufacture failures.
fn convert_dkim(
    resinfo: &AuthenticationResult,
    from_domain: &str,
    prefs: &Prefs,
) -> Option<SignatureResult> {
    let mut sdid = resinfo.props.get("header.d").cloned();
    let mut auid = resinfo.props.get("header.i").cloned();

    match (&sdid, &auid) {
        (None, Some(auid_value)) => {
            // derive the SDID from the AUID's domain part
            let (_, domain) = auid_value.rsplit_once('@')?;
            sdid = Some(domain.to_ascii_lowercase());
        }
        (Some(sdid_value), None) => {
            auid = Some(format!("@{sdid_value}"));
        }
        _ => {}
    }

    if let (Some(sdid_value), Some(auid_value)) = (&sdid, &auid) {
        let auid_domain = auid_value
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or(auid_value);
        if !domain_within(auid_domain, sdid_value) {
            tracing::warn!(
                "dropping ARH dkim entry: AUID {auid_value} is outside SDID {sdid_value}"
            );
            return None;
        }
    }

    let mut warnings = vec![];
    let mut algorithm = None;
    let mut hash_algorithm = None;
    if let Some(a) = resinfo.props.get("header.a") {
        match parse_algorithm(a) {
            Some((sig, hash)) => {
                if sig == SignatureAlgorithm::Rsa && hash == HashAlgorithm::Sha1 {
                    match prefs.error.rsa_sha1_treat_as {
                        TreatAs::Error => {
                            tracing::warn!(
                                "dropping ARH dkim entry: rsa-sha1 is configured as an error"
                            );
                            return None;
                        }
                        TreatAs::Warning => warnings.push(SignatureWarning::InsecureAlgorithm),
                        TreatAs::Ignore => {}
                    }
                }
                algorithm = Some(sig);
                hash_algorithm = Some(hash);
            }
            None => {
                tracing::warn!("dropping ARH dkim entry with unknown algorithm {a}");
                return None;
            }
        }
    }

    let verdict = match resinfo.result.as_str() {
        "pass" => Verdict::Success,
        "none" | "neutral" | "policy" => Verdict::None,
        "temperror" => Verdict::Tempfail(DKIMError::KeyUnavailable(
            resinfo
                .reason
                .clone()
                .unwrap_or_else(|| "temporary failure reported upstream".to_string()),
        )),
        _ => Verdict::Permfail(DKIMError::SignatureDidNotVerify),
    };

    if matches!(verdict, Verdict::Success) {
        if let Some(sdid_value) = &sdid {
            if !domain_within(from_domain, sdid_value) {
                warnings.push(SignatureWarning::FromNotInSdid);
            }
        }
    }

    Some(SignatureResult {
        verdict,
        sdid,
        auid,
        selector: resinfo.props.get("header.s").cloned(),
        warnings,
        algorithm,
        hash_algorithm,
        key_secure: false,
        verified_by: VerifiedBy::AuthResultHeader,
        signed_headers: vec![],
    })
}

/// Read the trusted Authentication-Results headers of a message. With no
/// configured allow list the first authserv-id seen is trusted
/// implicitly; everything else is ignored.
pub fn collect_arh(message: &Message<'_>, from_domain: &str, prefs: &Prefs) -> ArhData {
    let mode = if prefs.arh.relaxed_parsing {
        ParseMode::Relaxed
    } else {
        ParseMode::Strict
    };

    let mut data = ArhData::default();
    let mut implicitly_trusted: Option<String> = None;
    let mut bimi_pass = false;

    for header in message.headers().iter_named(ARH_HEADER_NAME) {
        let parsed = match header.as_authentication_results(mode) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("ignoring unparseable Authentication-Results header: {err}");
                continue;
            }
        };

        let trusted = if prefs.arh.allowed_authserv_ids.is_empty() {
            match &implicitly_trusted {
                None => {
                    implicitly_trusted = Some(parsed.serv_id.clone());
                    true
                }
                Some(id) => id.eq_ignore_ascii_case(&parsed.serv_id),
            }
        } else {
            prefs
                .arh
                .allowed_authserv_ids
                .iter()
                .any(|id| id.eq_ignore_ascii_case(&parsed.serv_id))
        };
        if !trusted {
            tracing::debug!("skipping Authentication-Results from {}", parsed.serv_id);
            continue;
        }

        for resinfo in &parsed.results {
            match resinfo.method.to_ascii_lowercase().as_str() {
                "dkim" => {
                    if let Some(result) = convert_dkim(resinfo, from_domain, prefs) {
                        data.dkim.push(result);
                    }
                }
                "spf" => data.spf.push(resinfo.clone()),
                "dmarc" => data.dmarc.push(resinfo.clone()),
                "bimi" => {
                    if resinfo.result == "pass" {
                        bimi_pass = true;
                    }
                }
                _ => {}
            }
        }
    }

    if bimi_pass {
        data.bimi_indicator = message
            .headers()
            .get_first(BIMI_INDICATOR_HEADER_NAME)
            .map(|header| {
                header
                    .unfolded_value()
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect()
            });
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailparsing::Message;

    fn prefs_with_arh() -> Prefs {
        let mut prefs = Prefs::default();
        prefs.arh.read = true;
        prefs
    }

    fn message(headers: &str) -> String {
        format!("{headers}From: joe@football.example.com\r\n\r\nbody\r\n")
    }

    #[test]
    fn converts_passing_dkim_entry() {
        let msg = message(
            "Authentication-Results: mx.example.com;\r\n\t dkim=pass header.d=football.example.com header.i=@football.example.com header.s=brisbane header.a=ed25519-sha256\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "football.example.com", &prefs_with_arh());
        assert_eq!(data.dkim.len(), 1);
        let result = &data.dkim[0];
        assert_eq!(result.verdict, Verdict::Success);
        assert_eq!(result.sdid.as_deref(), Some("football.example.com"));
        assert_eq!(result.selector.as_deref(), Some("brisbane"));
        assert_eq!(result.algorithm, Some(SignatureAlgorithm::Ed25519));
        assert_eq!(result.verified_by, VerifiedBy::AuthResultHeader);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn derives_sdid_from_auid() {
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.i=@football.example.com\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "football.example.com", &prefs_with_arh());
        assert_eq!(data.dkim[0].sdid.as_deref(), Some("football.example.com"));
    }

    #[test]
    fn drops_inconsistent_auid() {
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.d=example.com header.i=@elsewhere.org\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "example.com", &prefs_with_arh());
        assert!(data.dkim.is_empty());
    }

    #[test]
    fn first_authserv_is_trusted_implicitly() {
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.d=example.com\r\n\
             Authentication-Results: other.example.net; dkim=pass header.d=evil.org\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "example.com", &prefs_with_arh());
        assert_eq!(data.dkim.len(), 1);
        assert_eq!(data.dkim[0].sdid.as_deref(), Some("example.com"));
    }

    #[test]
    fn allow_list_filters_authservs() {
        let mut prefs = prefs_with_arh();
        prefs.arh.allowed_authserv_ids = vec!["other.example.net".to_string()];
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.d=example.com\r\n\
             Authentication-Results: other.example.net; dkim=fail header.d=example.com\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "example.com", &prefs);
        assert_eq!(data.dkim.len(), 1);
        assert_eq!(
            data.dkim[0].verdict,
            Verdict::Permfail(DKIMError::SignatureDidNotVerify)
        );
    }

    #[test]
    fn result_mapping() {
        let msg = message(
            "Authentication-Results: mx.example.com;\r\n\
             \t dkim=none header.d=a.example.com;\r\n\
             \t dkim=temperror header.d=b.example.com;\r\n\
             \t dkim=permerror header.d=c.example.com\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "example.com", &prefs_with_arh());
        assert_eq!(data.dkim.len(), 3);
        assert_eq!(data.dkim[0].verdict, Verdict::None);
        assert!(matches!(data.dkim[1].verdict, Verdict::Tempfail(_)));
        assert!(matches!(data.dkim[2].verdict, Verdict::Permfail(_)));
    }

    #[test]
    fn misaligned_from_warns() {
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.d=mailer.example.org\r\n",
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "football.example.com", &prefs_with_arh());
        assert_eq!(data.dkim[0].warnings, vec![SignatureWarning::FromNotInSdid]);
    }

    #[test]
    fn spf_dmarc_and_bimi_are_carried() {
        let msg = format!(
            "Authentication-Results: mx.example.com;\r\n\
             \t spf=pass smtp.mailfrom=example.com;\r\n\
             \t dmarc=pass header.from=example.com;\r\n\
             \t bimi=pass policy.authority=pass\r\n\
             BIMI-Indicator: aGVsbG8g\r\n c3ZnIGRhdGE=\r\n\
             From: joe@example.com\r\n\r\nbody\r\n"
        );
        let message = Message::parse(msg).unwrap();
        let data = collect_arh(&message, "example.com", &prefs_with_arh());
        assert_eq!(data.spf.len(), 1);
        assert_eq!(data.dmarc.len(), 1);
        assert_eq!(data.bimi_indicator.as_deref(), Some("aGVsbG8gc3ZnIGRhdGE="));
    }

    #[test]
    fn rsa_sha1_policy_applies_to_imported_results() {
        let msg = message(
            "Authentication-Results: mx.example.com; dkim=pass header.d=example.com header.a=rsa-sha1\r\n",
        );
        let message = Message::parse(msg).unwrap();

        let data = collect_arh(&message, "example.com", &prefs_with_arh());
        assert_eq!(
            data.dkim[0].warnings,
            vec![SignatureWarning::InsecureAlgorithm]
        );

        let mut prefs = prefs_with_arh();
        prefs.error.rsa_sha1_treat_as = TreatAs::Error;
        let data = collect_arh(&message, "example.com", &prefs);
        assert!(data.dkim.is_empty());
    }
}
