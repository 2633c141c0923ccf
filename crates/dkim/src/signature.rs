use crate::canonicalization::Type;
use crate::parser::TagMap;
use crate::DKIMError;
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    Rsa,
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// A validated DKIM-Signature header.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.5>
#[derive(Debug, Clone, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub hash_algorithm: HashAlgorithm,
    /// decoded b= value
    pub signature_bytes: Vec<u8>,
    /// b= value as it appeared in the header, interior FWS intact; the
    /// header hash input reproduces the header with this text removed
    pub raw_b: String,
    /// claimed body hash, base64 with FWS stripped
    pub body_hash: String,
    pub canon_header: Type,
    pub canon_body: Type,
    pub sdid: String,
    /// lowercased h= names in signature order, duplicates retained
    pub signed_headers: Vec<String>,
    /// i= value, defaulted to `@<sdid>`
    pub auid: String,
    pub body_length: Option<u64>,
    pub selector: String,
    pub timestamp: Option<i64>,
    pub expiration: Option<i64>,
}

fn is_domain_name(value: &str) -> bool {
    !value.is_empty()
        && value.contains('.')
        && !value.starts_with('.')
        && !value.ends_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// true when `domain` equals `zone` or is a subdomain of it
pub(crate) fn domain_is_within(domain: &str, zone: &str) -> bool {
    domain.eq_ignore_ascii_case(zone)
        || domain
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", zone.to_ascii_lowercase()))
}

fn parse_canonicalization(value: Option<&str>) -> Result<(Type, Type), DKIMError> {
    use Type::{Relaxed, Simple};
    match value {
        None => Ok((Simple, Simple)),
        Some("simple/simple") | Some("simple") => Ok((Simple, Simple)),
        Some("relaxed/simple") | Some("relaxed") => Ok((Relaxed, Simple)),
        Some("simple/relaxed") => Ok((Simple, Relaxed)),
        Some("relaxed/relaxed") => Ok((Relaxed, Relaxed)),
        Some(v) => Err(DKIMError::UnsupportedCanonicalization(v.to_owned())),
    }
}

fn parse_algorithm(value: &str) -> Result<(SignatureAlgorithm, HashAlgorithm), DKIMError> {
    let (sig, hash) = value
        .split_once('-')
        .ok_or_else(|| DKIMError::IllformedTag("a", value.to_owned()))?;
    let sig = match sig {
        "rsa" => SignatureAlgorithm::Rsa,
        "ed25519" => SignatureAlgorithm::Ed25519,
        other => return Err(DKIMError::UnsupportedSignatureAlgorithm(other.to_owned())),
    };
    let hash = match (sig, hash) {
        (_, "sha256") => HashAlgorithm::Sha256,
        (SignatureAlgorithm::Rsa, "sha1") => HashAlgorithm::Sha1,
        (_, other) => return Err(DKIMError::UnsupportedHashAlgorithm(other.to_owned())),
    };
    Ok((sig, hash))
}

impl DkimSignature {
    /// Parse and validate a DKIM-Signature header value.
    /// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.1>
    pub fn parse(value: &str) -> Result<Self, DKIMError> {
        let tags = TagMap::from_signature(value)?;

        const REQUIRED_TAGS: &[&str] = &["v", "a", "b", "bh", "d", "h", "s"];
        for required in REQUIRED_TAGS {
            if tags.get(required).is_none() {
                return Err(DKIMError::SignatureMissingRequiredTag(required));
            }
        }

        if tags.get("v") != Some("1") {
            return Err(DKIMError::IncompatibleVersion);
        }

        let (algorithm, hash_algorithm) = parse_algorithm(tags.get("a").unwrap())?;

        let b = tags.get("b").unwrap();
        if b.is_empty() {
            return Err(DKIMError::IllformedTag("b", "empty".to_owned()));
        }
        let signature_bytes = BASE64
            .decode(b.as_bytes())
            .map_err(|err| DKIMError::IllformedTag("b", err.to_string()))?;
        let raw_b = tags.get_raw("b").unwrap().to_owned();

        let body_hash = tags.get("bh").unwrap().to_owned();
        BASE64
            .decode(body_hash.as_bytes())
            .map_err(|err| DKIMError::IllformedTag("bh", err.to_string()))?;

        let (canon_header, canon_body) = parse_canonicalization(tags.get("c"))?;

        let sdid = tags.get("d").unwrap().to_ascii_lowercase();
        if !is_domain_name(&sdid) {
            return Err(DKIMError::IllformedTag("d", sdid));
        }

        let mut signed_headers = vec![];
        for name in tags.get("h").unwrap().split(':') {
            if name.is_empty() {
                return Err(DKIMError::IllformedTag(
                    "h",
                    tags.get("h").unwrap().to_owned(),
                ));
            }
            signed_headers.push(name.to_ascii_lowercase());
        }
        if !signed_headers.iter().any(|h| h == "from") {
            return Err(DKIMError::FromFieldNotSigned);
        }

        let auid = match tags.get("i") {
            None => format!("@{sdid}"),
            Some(user) => {
                let Some((_local, domain)) = user.rsplit_once('@') else {
                    return Err(DKIMError::IllformedTag("i", user.to_owned()));
                };
                if !domain_is_within(domain, &sdid) {
                    return Err(DKIMError::DomainMismatch);
                }
                user.to_owned()
            }
        };

        let body_length = match tags.get("l") {
            None => None,
            Some(l) => Some(
                l.parse::<u64>()
                    .map_err(|err| DKIMError::IllformedTag("l", err.to_string()))?,
            ),
        };

        if let Some(query_methods) = tags.get("q") {
            if !query_methods.split(':').any(|m| m == "dns/txt") {
                return Err(DKIMError::UnsupportedQueryMethod);
            }
        }

        let selector = tags.get("s").unwrap().to_owned();
        if selector.is_empty() {
            return Err(DKIMError::IllformedTag("s", selector));
        }

        let timestamp = match tags.get("t") {
            None => None,
            Some(t) => Some(
                t.parse::<i64>()
                    .map_err(|err| DKIMError::IllformedTag("t", err.to_string()))?,
            ),
        };
        let expiration = match tags.get("x") {
            None => None,
            Some(x) => Some(
                x.parse::<i64>()
                    .map_err(|err| DKIMError::IllformedTag("x", err.to_string()))?,
            ),
        };
        if let (Some(t), Some(x)) = (timestamp, expiration) {
            if t > x {
                return Err(DKIMError::Timestamps);
            }
        }

        Ok(Self {
            algorithm,
            hash_algorithm,
            signature_bytes,
            raw_b,
            body_hash,
            canon_header,
            canon_body,
            sdid,
            signed_headers,
            auid,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }

    pub fn auid_domain(&self) -> &str {
        match self.auid.rsplit_once('@') {
            Some((_, domain)) => domain,
            None => &self.auid,
        }
    }

    pub fn algorithm_name(&self) -> String {
        format!("{}-{}", self.algorithm.name(), self.hash_algorithm.name())
    }
}
