use crate::hash::{compute_body_hash, compute_headers_hash};
use crate::key::DkimKeyRecord;
use crate::public_key::DkimPublicKey;
use crate::result::{SignatureResult, SignatureWarning, Verdict, VerifiedBy};
use crate::signature::{domain_is_within, DkimSignature, HashAlgorithm, SignatureAlgorithm};
use crate::{DKIMError, Status};
use async_trait::async_trait;
use dns_resolver::Resolver;
use futures::future::join_all;
use mailparsing::{Header, HeaderMap, Message};
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;

pub const DKIM_SIGNATURE_HEADER_NAME: &str = "DKIM-Signature";
const DNS_NAMESPACE: &str = "_domainkey";
/// Limit DoS impact if a malicious message is filled with signatures
const MAX_SIGNATURES_PER_MESSAGE: usize = 10;
const MIN_RSA_KEY_BITS: usize = 1024;

/// How to react to configurable trust problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatAs {
    Error,
    Warning,
    Ignore,
}

/// Whether to flag display-relevant headers that were left unsigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsignedHeadersMode {
    Off,
    Recommended,
    Strict,
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// rsa-sha1 signatures (default: warn)
    pub rsa_sha1: TreatAs,
    /// RSA keys below 1024 bits (default: ignore, for compatibility with
    /// ancient but still-published keys)
    pub weak_rsa_key: TreatAs,
    pub unsigned_headers: UnsignedHeadersMode,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            rsa_sha1: TreatAs::Warning,
            weak_rsa_key: TreatAs::Ignore,
            unsigned_headers: UnsignedHeadersMode::Off,
        }
    }
}

/// A key record plus how trustworthy its retrieval path was
#[derive(Debug, Clone)]
pub struct RetrievedKey {
    pub record: DkimKeyRecord,
    /// DNSSEC validated, or affirmed by the user in the key store
    pub secure: bool,
}

/// Where the verifier gets public keys. The plain implementation queries
/// DNS; a caching key store interposes by implementing this trait.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key(&self, sdid: &str, selector: &str) -> Result<RetrievedKey, DKIMError>;
}

pub fn dkim_key_name(sdid: &str, selector: &str) -> String {
    format!("{selector}.{DNS_NAMESPACE}.{sdid}")
}

/// Fetches `<selector>._domainkey.<sdid>` TXT records.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.2>
pub struct DnsKeySource<'a> {
    resolver: &'a dyn Resolver,
}

impl<'a> DnsKeySource<'a> {
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl KeySource for DnsKeySource<'_> {
    async fn fetch_key(&self, sdid: &str, selector: &str) -> Result<RetrievedKey, DKIMError> {
        let name = dkim_key_name(sdid, selector);
        let answer = self
            .resolver
            .resolve_txt(&name)
            .await
            .map_err(|err| DKIMError::KeyUnavailable(err.to_string()))?;

        if answer.bogus {
            return Err(DKIMError::DnsBogus(
                answer.why_bogus.unwrap_or_else(|| "bogus".to_string()),
            ));
        }
        if !answer.is_authoritative_answer() {
            return Err(DKIMError::DnsServerError(format!(
                "rcode {} for {name}",
                answer.rcode
            )));
        }
        if answer.nxdomain() || answer.records.is_empty() {
            return Err(DKIMError::NoKeyForSignature);
        }
        tracing::debug!("DKIM TXT {name}: {:?}", answer.records);

        // During key rotation more than one record may be published; use
        // the first one that parses
        let mut first_err = None;
        for txt in &answer.records {
            match DkimKeyRecord::parse(txt) {
                Ok(record) => {
                    return Ok(RetrievedKey {
                        record,
                        secure: answer.secure,
                    })
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        Err(first_err.unwrap_or(DKIMError::NoKeyForSignature))
    }
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-6.1.3 Step 4
fn verify_signature_bytes(
    algorithm: SignatureAlgorithm,
    hash_algorithm: HashAlgorithm,
    header_hash: &[u8],
    signature: &[u8],
    public_key: &DkimPublicKey,
) -> Result<bool, DKIMError> {
    match public_key {
        DkimPublicKey::Rsa(public_key) => Ok(public_key
            .verify(
                match hash_algorithm {
                    HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
                    HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
                },
                header_hash,
                signature,
            )
            .is_ok()),
        DkimPublicKey::Ed25519(public_key) => {
            if algorithm != SignatureAlgorithm::Ed25519 {
                return Err(DKIMError::KeyMismatchedAlgorithm);
            }
            let sig_bytes: [u8; ed25519_dalek::Signature::BYTE_SIZE] =
                signature.try_into().map_err(|_| {
                    DKIMError::IllformedTag(
                        "b",
                        format!(
                            "ed25519 signatures are {} bytes, have {}",
                            ed25519_dalek::Signature::BYTE_SIZE,
                            signature.len()
                        ),
                    )
                })?;

            // RFC 8463: the ed25519 signature is computed over the
            // SHA-256 digest of the header hash input
            Ok(public_key
                .verify_strict(
                    header_hash,
                    &ed25519_dalek::Signature::from_bytes(&sig_bytes),
                )
                .is_ok())
        }
    }
}

fn unsigned_header_warnings(
    mode: UnsignedHeadersMode,
    signed_headers: &[String],
    headers: &HeaderMap,
) -> Vec<SignatureWarning> {
    let candidates: &[&str] = match mode {
        UnsignedHeadersMode::Off => &[],
        UnsignedHeadersMode::Recommended => &["subject"],
        UnsignedHeadersMode::Strict => &["subject", "date", "to", "cc"],
    };
    candidates
        .iter()
        .filter(|name| {
            headers.get_first(name).is_some() && !signed_headers.iter().any(|s| s == *name)
        })
        .map(|name| SignatureWarning::UnsignedHeader(name.to_string()))
        .collect()
}

struct Verified {
    warnings: Vec<SignatureWarning>,
    key_secure: bool,
    testmode: bool,
}

async fn verify_parsed_signature(
    signature: &DkimSignature,
    sig_header: &Header<'_>,
    message: &Message<'_>,
    from_domain: &str,
    key_source: &dyn KeySource,
    options: &VerifyOptions,
) -> Result<Verified, DKIMError> {
    let mut warnings = vec![];

    // body hash first; a mismatch fails without touching the network
    let body = message.body();
    let body_hash = compute_body_hash(
        signature.canon_body,
        signature.body_length,
        signature.hash_algorithm,
        body.as_bytes(),
    )?;
    if body_hash.truncated {
        warnings.push(SignatureWarning::SmallL);
    }
    if body_hash.hash != signature.body_hash {
        tracing::debug!(
            "body hash mismatch: computed {} vs claimed {}",
            body_hash.hash,
            signature.body_hash
        );
        return Err(DKIMError::BodyHashDidNotVerify);
    }

    let key = key_source
        .fetch_key(&signature.sdid, &signature.selector)
        .await?;

    if !key.record.key_type.matches(signature.algorithm) {
        return Err(DKIMError::KeyMismatchedAlgorithm);
    }
    if !key.record.allows_hash(signature.hash_algorithm) {
        return Err(DKIMError::KeyHashNotIncluded);
    }
    if key.record.strict_auid
        && !signature.auid_domain().eq_ignore_ascii_case(&signature.sdid)
    {
        return Err(DKIMError::DomainMismatch);
    }

    let public_key = DkimPublicKey::from_record(&key.record)?;

    if signature.algorithm == SignatureAlgorithm::Rsa
        && public_key.bits() < MIN_RSA_KEY_BITS
    {
        match options.weak_rsa_key {
            TreatAs::Error => return Err(DKIMError::KeyTooSmall),
            TreatAs::Warning => warnings.push(SignatureWarning::KeySmall),
            TreatAs::Ignore => {}
        }
    }
    if signature.algorithm == SignatureAlgorithm::Rsa
        && signature.hash_algorithm == HashAlgorithm::Sha1
    {
        match options.rsa_sha1 {
            TreatAs::Error => return Err(DKIMError::InsecureAlgorithm),
            TreatAs::Warning => warnings.push(SignatureWarning::InsecureAlgorithm),
            TreatAs::Ignore => {}
        }
    }

    let header_hash = compute_headers_hash(
        signature.canon_header,
        &signature.signed_headers,
        signature.hash_algorithm,
        sig_header,
        &signature.raw_b,
        message.headers(),
    )?;

    if !verify_signature_bytes(
        signature.algorithm,
        signature.hash_algorithm,
        &header_hash,
        &signature.signature_bytes,
        &public_key,
    )? {
        return Err(DKIMError::SignatureDidNotVerify);
    }

    let now = chrono::Utc::now().timestamp();
    if let Some(expiration) = signature.expiration {
        if expiration < now {
            warnings.push(SignatureWarning::Expired);
        }
    }
    if let Some(timestamp) = signature.timestamp {
        if timestamp > now {
            warnings.push(SignatureWarning::Future);
        }
    }
    if !domain_is_within(from_domain, &signature.sdid) {
        warnings.push(SignatureWarning::FromNotInSdid);
    }
    warnings.extend(unsigned_header_warnings(
        options.unsigned_headers,
        &signature.signed_headers,
        message.headers(),
    ));

    Ok(Verified {
        warnings,
        key_secure: key.secure,
        testmode: key.record.testmode,
    })
}

/// Verify a single DKIM-Signature header in isolation. Never fails: any
/// error is folded into the result for this signature only.
pub async fn verify_signature_header(
    sig_header: &Header<'_>,
    message: &Message<'_>,
    from_domain: &str,
    key_source: &dyn KeySource,
    options: &VerifyOptions,
) -> SignatureResult {
    let signature = match DkimSignature::parse(sig_header.get_raw_value()) {
        Ok(signature) => signature,
        Err(err) => {
            // the sdid cannot be trusted when the signature did not parse
            return match err.status() {
                Status::Permfail => SignatureResult::permfail(err),
                Status::Tempfail => SignatureResult::tempfail(err),
            };
        }
    };

    let mut result = SignatureResult {
        verdict: Verdict::None,
        sdid: Some(signature.sdid.clone()),
        auid: Some(signature.auid.clone()),
        selector: Some(signature.selector.clone()),
        warnings: vec![],
        algorithm: Some(signature.algorithm),
        hash_algorithm: Some(signature.hash_algorithm),
        key_secure: false,
        verified_by: VerifiedBy::DkimVerifier,
        signed_headers: signature.signed_headers.clone(),
    };

    match verify_parsed_signature(
        &signature,
        sig_header,
        message,
        from_domain,
        key_source,
        options,
    )
    .await
    {
        Ok(verified) => {
            result.warnings = verified.warnings;
            result.key_secure = verified.key_secure;
            if verified.testmode {
                // the signer declared test mode: pass through as unsigned
                result.warnings.push(SignatureWarning::KeyTestmode);
                result.verdict = Verdict::None;
            } else {
                result.verdict = Verdict::Success;
            }
        }
        Err(err) => {
            result.verdict = match err.status() {
                Status::Permfail => Verdict::Permfail(err),
                Status::Tempfail => Verdict::Tempfail(err),
            };
        }
    }
    result
}

/// Verify every DKIM-Signature header of the message. Results are in
/// header order; [`crate::sort_results`] orders them for display.
pub async fn verify_message(
    message: &Message<'_>,
    from_domain: &str,
    key_source: &dyn KeySource,
    options: &VerifyOptions,
) -> Vec<SignatureResult> {
    let futures: Vec<_> = message
        .headers()
        .iter_named(DKIM_SIGNATURE_HEADER_NAME)
        .take(MAX_SIGNATURES_PER_MESSAGE)
        .map(|header| verify_signature_header(header, message, from_domain, key_source, options))
        .collect();

    join_all(futures).await
}
