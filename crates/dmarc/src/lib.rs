//! The minimal slice of DMARC (RFC 7489) needed to decide whether a
//! sender's mail should carry a DKIM signature: policy record discovery
//! with organizational-domain fallback and record parsing. Enforcement,
//! reporting and SPF alignment are out of scope.

use dns_resolver::Resolver;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DmarcError {
    #[error("invalid DMARC record: {0}")]
    InvalidRecord(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    None,
    Quarantine,
    Reject,
}

impl FromStr for Policy {
    type Err = DmarcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "none" => Self::None,
            "quarantine" => Self::Quarantine,
            "reject" => Self::Reject,
            _ => return Err(DmarcError::InvalidRecord(format!("invalid policy {value:?}"))),
        })
    }
}

/// DKIM identifier alignment (`adkim`)
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Relaxed,
    Strict,
}

impl FromStr for Mode {
    type Err = DmarcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "r" => Self::Relaxed,
            "s" => Self::Strict,
            _ => return Err(DmarcError::InvalidRecord(format!("invalid mode {value:?}"))),
        })
    }
}

/// A parsed DMARC policy record. Tags that play no part in the
/// shouldBeSigned decision are parsed for validity and kept; unknown
/// tags are ignored per RFC 7489 §6.3.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub policy: Policy,
    pub subdomain_policy: Option<Policy>,
    pub align_dkim: Mode,
    /// pct; parsed but deliberately unused by the decision
    pub rate: u8,
}

impl FromStr for Record {
    type Err = DmarcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut policy = None;
        let mut subdomain_policy = None;
        let mut align_dkim = Mode::Relaxed;
        let mut rate = 100u8;

        let mut version = false;
        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(DmarcError::InvalidRecord(format!("invalid part {part:?}")));
            };
            let (key, value) = (key.trim(), value.trim());

            if !version {
                match (key, value) {
                    ("v", "DMARC1") => {
                        version = true;
                        continue;
                    }
                    _ => {
                        return Err(DmarcError::InvalidRecord(
                            "record does not start with v=DMARC1".to_string(),
                        ))
                    }
                }
            }

            match key {
                "p" => policy = Some(Policy::from_str(value)?),
                "sp" => subdomain_policy = Some(Policy::from_str(value)?),
                "adkim" => align_dkim = Mode::from_str(value)?,
                "pct" => {
                    rate = u8::from_str(value)
                        .ok()
                        .filter(|pct| *pct <= 100)
                        .ok_or_else(|| {
                            DmarcError::InvalidRecord(format!("invalid value {value:?} for pct"))
                        })?;
                }
                _ => tracing::debug!("ignoring DMARC tag {key}={value}"),
            }
        }

        match policy {
            Some(policy) => Ok(Self {
                policy,
                subdomain_policy,
                align_dkim,
                rate,
            }),
            None => Err(DmarcError::InvalidRecord(format!("missing policy in {s:?}"))),
        }
    }
}

/// The strictest published policy that still triggers a
/// signature-required verdict
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeededPolicy {
    None,
    Quarantine,
    Reject,
}

impl NeededPolicy {
    fn satisfied_by(&self, policy: Policy) -> bool {
        match self {
            Self::None => true,
            Self::Quarantine => policy != Policy::None,
            Self::Reject => policy == Policy::Reject,
        }
    }
}

/// Outcome of the heuristic. A `should_be_signed == false` with
/// `policy == None` means no opinion (no usable record, or DNS trouble).
#[derive(Debug, Clone, PartialEq)]
pub struct ShouldBeSigned {
    pub should_be_signed: bool,
    /// domains a qualifying signature is expected from
    pub sdids: Vec<String>,
    /// the effective policy, when a record was found
    pub policy: Option<Policy>,
    /// the domain whose record decided the outcome
    pub source_domain: Option<String>,
}

impl ShouldBeSigned {
    fn no_opinion() -> Self {
        Self {
            should_be_signed: false,
            sdids: vec![],
            policy: None,
            source_domain: None,
        }
    }
}

fn organizational_domain(domain: &str) -> Option<String> {
    psl::domain_str(domain).map(|s| s.to_ascii_lowercase())
}

async fn query_record(resolver: &dyn Resolver, domain: &str) -> Result<Option<Record>, bool> {
    // Err(true) signals NXDomain (fallback allowed), Err(false) any other
    // failure to obtain a usable record
    let name = format!("_dmarc.{domain}");
    let answer = match resolver.resolve_txt(&name).await {
        Ok(answer) => answer,
        Err(err) => {
            tracing::debug!("DMARC query for {name} failed: {err}");
            return Err(false);
        }
    };
    if answer.bogus || !answer.is_authoritative_answer() {
        return Err(false);
    }
    if answer.nxdomain() {
        return Err(true);
    }

    // TXT records can hold all sorts of things; take the first one that
    // looks like a DMARC record and parses
    for txt in &answer.records {
        if txt.starts_with("v=DMARC1") {
            match Record::from_str(txt) {
                Ok(record) => return Ok(Some(record)),
                Err(err) => {
                    tracing::debug!("failed to parse DMARC record at {name}: {err}");
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

/// Decide whether mail from `from_domain` is expected to carry a DKIM
/// signature, per the published DMARC policy. DNS trouble is never
/// fatal; it yields no opinion.
pub async fn should_be_signed(
    resolver: &dyn Resolver,
    from_domain: &str,
    needed: NeededPolicy,
) -> ShouldBeSigned {
    let from_domain = from_domain.to_ascii_lowercase();
    let org_domain = organizational_domain(&from_domain);

    let (record, source_domain, used_fallback) =
        match query_record(resolver, &from_domain).await {
            Ok(Some(record)) => (record, from_domain.clone(), false),
            Ok(None) | Err(false) => return ShouldBeSigned::no_opinion(),
            Err(true) => {
                // NXDomain: fall back to the organizational domain
                let Some(org) = org_domain.clone().filter(|org| *org != from_domain) else {
                    return ShouldBeSigned::no_opinion();
                };
                match query_record(resolver, &org).await {
                    Ok(Some(record)) => (record, org, true),
                    _ => return ShouldBeSigned::no_opinion(),
                }
            }
        };

    // on the fallback record, sp overrides p for subdomain mail
    let policy = if used_fallback {
        record.subdomain_policy.unwrap_or(record.policy)
    } else {
        record.policy
    };

    let mut sdids = vec![from_domain.clone()];
    if used_fallback || record.align_dkim == Mode::Relaxed {
        if let Some(org) = org_domain {
            if org != from_domain {
                sdids.push(org);
            }
        }
    }

    ShouldBeSigned {
        should_be_signed: needed.satisfied_by(policy),
        sdids,
        policy: Some(policy),
        source_domain: Some(source_domain),
    }
}
