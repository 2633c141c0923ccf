use crate::signature::{domain_is_within, HashAlgorithm, SignatureAlgorithm};
use crate::DKIMError;

/// Per-signature warnings. Like errors these carry a stable
/// machine-readable type string; display text is the consumer's concern.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureWarning {
    /// l= covers less than the whole body
    SmallL,
    /// the signature expired (x= in the past)
    Expired,
    /// the signature timestamp is in the future
    Future,
    /// the From address is outside the signing domain
    FromNotInSdid,
    /// RSA key below 1024 bits
    KeySmall,
    /// rsa-sha1 accepted but frowned upon
    InsecureAlgorithm,
    /// the key is in test mode; the result was downgraded
    KeyTestmode,
    /// a header worth signing was present but unsigned
    UnsignedHeader(String),
    /// policy expected a different signing domain
    WrongSdid,
}

impl SignatureWarning {
    pub fn warning_type(&self) -> &'static str {
        match self {
            Self::SmallL => "DKIM_SIGWARNING_SMALL_L",
            Self::Expired => "DKIM_SIGWARNING_EXPIRED",
            Self::Future => "DKIM_SIGWARNING_FUTURE",
            Self::FromNotInSdid => "DKIM_SIGWARNING_FROM_NOT_IN_SDID",
            Self::KeySmall => "DKIM_SIGERROR_KEY_SMALL",
            Self::InsecureAlgorithm => "DKIM_SIGERROR_INSECURE_A",
            Self::KeyTestmode => "DKIM_SIGWARNING_KEY_TESTMODE",
            Self::UnsignedHeader(_) => "DKIM_SIGWARNING_UNSIGNED_HEADER",
            Self::WrongSdid => "DKIM_POLICYWARNING_WRONG_SDID",
        }
    }

    /// Optional parameter for display purposes
    pub fn param(&self) -> Option<&str> {
        match self {
            Self::UnsignedHeader(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// no (usable) signature
    None,
    Success,
    Permfail(DKIMError),
    Tempfail(DKIMError),
}

impl Verdict {
    pub fn summary(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Success => "pass",
            Self::Permfail(_) => "permerror",
            Self::Tempfail(_) => "temperror",
        }
    }

    pub fn error(&self) -> Option<&DKIMError> {
        match self {
            Self::Permfail(err) | Self::Tempfail(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedBy {
    /// verified locally by this engine
    DkimVerifier,
    /// imported from a trusted Authentication-Results header
    AuthResultHeader,
}

/// The outcome for one DKIM-Signature header
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureResult {
    pub verdict: Verdict,
    pub sdid: Option<String>,
    pub auid: Option<String>,
    pub selector: Option<String>,
    pub warnings: Vec<SignatureWarning>,
    pub algorithm: Option<SignatureAlgorithm>,
    pub hash_algorithm: Option<HashAlgorithm>,
    /// the key was retrieved over a DNSSEC validated path or affirmed by
    /// the user
    pub key_secure: bool,
    pub verified_by: VerifiedBy,
    pub signed_headers: Vec<String>,
}

impl SignatureResult {
    pub fn none() -> Self {
        Self::bare(Verdict::None)
    }

    pub fn permfail(error: DKIMError) -> Self {
        Self::bare(Verdict::Permfail(error))
    }

    pub fn tempfail(error: DKIMError) -> Self {
        Self::bare(Verdict::Tempfail(error))
    }

    fn bare(verdict: Verdict) -> Self {
        Self {
            verdict,
            sdid: None,
            auid: None,
            selector: None,
            warnings: vec![],
            algorithm: None,
            hash_algorithm: None,
            key_secure: false,
            verified_by: VerifiedBy::DkimVerifier,
            signed_headers: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.verdict, Verdict::Success)
    }

    /// Result quality for display ordering: clean successes ahead of
    /// warned ones, then tempfails, permfails, and finally no-signature.
    fn quality(&self) -> u8 {
        match &self.verdict {
            Verdict::Success if self.warnings.is_empty() => 0,
            Verdict::Success => 1,
            Verdict::Tempfail(_) => 2,
            Verdict::Permfail(_) => 3,
            Verdict::None => 4,
        }
    }

    fn aligned_with(&self, from_domain: &str) -> bool {
        match &self.sdid {
            Some(sdid) => domain_is_within(from_domain, sdid),
            None => false,
        }
    }
}

/// Order results best-first; within a quality class, signatures whose
/// SDID aligns with the From domain come first. The sort is stable, so
/// header order breaks any remaining ties.
pub fn sort_results(results: &mut [SignatureResult], from_domain: &str) {
    results.sort_by_key(|r| (r.quality(), !r.aligned_with(from_domain)));
}
