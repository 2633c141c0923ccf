use thiserror::Error;

/// Whether a failure is permanent (cachable, retrying will not help) or
/// transient (must not be cached, retried on the next view).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Permfail,
    Tempfail,
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum DKIMError {
    #[error("signature tag list is ill-formed: {0}")]
    IllformedTagSpec(String),
    #[error("duplicate tag in signature: {0}")]
    DuplicateTag(String),
    #[error("signature missing required tag ({0})")]
    SignatureMissingRequiredTag(&'static str),
    #[error("invalid \"{0}=\" tag value: {1}")]
    IllformedTag(&'static str, String),
    #[error("incompatible signature version")]
    IncompatibleVersion,
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(String),
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),
    #[error("unsupported canonicalization: {0}")]
    UnsupportedCanonicalization(String),
    #[error("AUID is not within the signing domain")]
    DomainMismatch,
    #[error("From field not signed")]
    FromFieldNotSigned,
    #[error("unsupported query method")]
    UnsupportedQueryMethod,
    #[error("signature timestamp is later than its expiration")]
    Timestamps,
    #[error("body length tag exceeds the canonical body")]
    TooLargeL,
    #[error("body hash did not verify")]
    BodyHashDidNotVerify,
    #[error("signature did not verify")]
    SignatureDidNotVerify,
    #[error("rsa-sha1 signatures are not accepted")]
    InsecureAlgorithm,

    #[error("no key record for signature")]
    NoKeyForSignature,
    #[error("key record tag list is ill-formed: {0}")]
    KeyIllformedTagSpec(String),
    #[error("duplicate tag in key record: {0}")]
    KeyDuplicateTag(String),
    #[error("key record has an incompatible version")]
    KeyIncompatibleVersion,
    #[error("unknown key type: {0}")]
    KeyUnknownType(String),
    #[error("key record is missing the public key tag")]
    KeyMissingP,
    #[error("key has been revoked")]
    KeyRevoked,
    #[error("key record is not an email key")]
    KeyNotEmailKey,
    #[error("key record does not allow the signature's hash algorithm")]
    KeyHashNotIncluded,
    #[error("key type does not match the signature algorithm")]
    KeyMismatchedAlgorithm,
    #[error("failed to decode public key: {0}")]
    KeyDecode(String),
    #[error("RSA public key is too small")]
    KeyTooSmall,

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("DNS server error: {0}")]
    DnsServerError(String),
    #[error("DNSSEC validation failed: {0}")]
    DnsBogus(String),

    #[error("a signature from {0:?} is required but missing")]
    PolicyMissingSignature(Vec<String>),
    #[error("signed by {got}, policy requires {expected:?}")]
    PolicyWrongSdid { got: String, expected: Vec<String> },
    #[error("key record differs from the cached key")]
    KeyMismatch,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl DKIMError {
    pub fn status(&self) -> Status {
        use DKIMError::*;
        match self {
            KeyUnavailable(_) | DnsServerError(_) | DnsBogus(_) | InternalError(_) => {
                Status::Tempfail
            }
            _ => Status::Permfail,
        }
    }

    /// The stable machine-readable error type string. Consumers key
    /// localization and display decisions off these; they never change.
    pub fn error_type(&self) -> &'static str {
        use DKIMError::*;
        match self {
            IllformedTagSpec(_) => "DKIM_SIGERROR_ILLFORMED_TAGSPEC",
            DuplicateTag(_) => "DKIM_SIGERROR_DUPLICATE_TAG",
            SignatureMissingRequiredTag(name) => match *name {
                "v" => "DKIM_SIGERROR_MISSING_V",
                "a" => "DKIM_SIGERROR_MISSING_A",
                "b" => "DKIM_SIGERROR_MISSING_B",
                "bh" => "DKIM_SIGERROR_MISSING_BH",
                "d" => "DKIM_SIGERROR_MISSING_D",
                "h" => "DKIM_SIGERROR_MISSING_H",
                "s" => "DKIM_SIGERROR_MISSING_S",
                _ => "DKIM_SIGERROR_MISSING_TAG",
            },
            IllformedTag(name, _) => match *name {
                "v" => "DKIM_SIGERROR_ILLFORMED_V",
                "a" => "DKIM_SIGERROR_ILLFORMED_A",
                "b" => "DKIM_SIGERROR_ILLFORMED_B",
                "bh" => "DKIM_SIGERROR_ILLFORMED_BH",
                "c" => "DKIM_SIGERROR_ILLFORMED_C",
                "d" => "DKIM_SIGERROR_ILLFORMED_D",
                "h" => "DKIM_SIGERROR_ILLFORMED_H",
                "i" => "DKIM_SIGERROR_ILLFORMED_I",
                "l" => "DKIM_SIGERROR_ILLFORMED_L",
                "q" => "DKIM_SIGERROR_ILLFORMED_Q",
                "s" => "DKIM_SIGERROR_ILLFORMED_S",
                "t" => "DKIM_SIGERROR_ILLFORMED_T",
                "x" => "DKIM_SIGERROR_ILLFORMED_X",
                "z" => "DKIM_SIGERROR_ILLFORMED_Z",
                _ => "DKIM_SIGERROR_ILLFORMED_TAG",
            },
            IncompatibleVersion => "DKIM_SIGERROR_VERSION",
            UnsupportedSignatureAlgorithm(_) => "DKIM_SIGERROR_UNKNOWN_A_SIG",
            UnsupportedHashAlgorithm(_) => "DKIM_SIGERROR_UNKNOWN_A_HASH",
            UnsupportedCanonicalization(_) => "DKIM_SIGERROR_UNKNOWN_C",
            DomainMismatch => "DKIM_SIGERROR_DOMAIN_I",
            FromFieldNotSigned => "DKIM_SIGERROR_MISSING_FROM",
            UnsupportedQueryMethod => "DKIM_SIGERROR_UNKNOWN_Q",
            Timestamps => "DKIM_SIGERROR_TIMESTAMPS",
            TooLargeL => "DKIM_SIGERROR_TOOLARGE_L",
            BodyHashDidNotVerify => "DKIM_SIGERROR_CORRUPT_BH",
            SignatureDidNotVerify => "DKIM_SIGERROR_BADSIG",
            InsecureAlgorithm => "DKIM_SIGERROR_INSECURE_A",

            NoKeyForSignature => "DKIM_SIGERROR_KEYFAIL",
            KeyIllformedTagSpec(_) => "DKIM_SIGERROR_KEY_ILLFORMED_TAGSPEC",
            KeyDuplicateTag(_) => "DKIM_SIGERROR_KEY_DUPLICATE_TAG",
            KeyIncompatibleVersion => "DKIM_SIGERROR_KEY_INVALID_V",
            KeyUnknownType(_) => "DKIM_SIGERROR_KEY_UNKNOWN_K",
            KeyMissingP => "DKIM_SIGERROR_KEY_MISSING_P",
            KeyRevoked => "DKIM_SIGERROR_KEY_REVOKED",
            KeyNotEmailKey => "DKIM_SIGERROR_KEY_NOTEMAILKEY",
            KeyHashNotIncluded => "DKIM_SIGERROR_KEY_HASHNOTINCLUDED",
            KeyMismatchedAlgorithm => "DKIM_SIGERROR_KEY_MISMATCHED_K",
            KeyDecode(_) => "DKIM_SIGERROR_KEYDECODE",
            KeyTooSmall => "DKIM_SIGERROR_KEY_SMALL",

            KeyUnavailable(_) => "DKIM_DNSERROR_OFFLINE",
            DnsServerError(_) => "DKIM_DNSERROR_SERVER_ERROR",
            DnsBogus(_) => "DKIM_DNSERROR_DNSSEC_BOGUS",

            PolicyMissingSignature(_) => "DKIM_POLICYERROR_MISSING_SIG",
            PolicyWrongSdid { .. } => "DKIM_POLICYERROR_WRONG_SDID",
            KeyMismatch => "DKIM_POLICYERROR_KEYMISMATCH",

            InternalError(_) => "DKIM_INTERNALERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(DKIMError::BodyHashDidNotVerify.status(), Status::Permfail);
        assert_eq!(DKIMError::KeyRevoked.status(), Status::Permfail);
        assert_eq!(
            DKIMError::KeyUnavailable("offline".to_string()).status(),
            Status::Tempfail
        );
        assert_eq!(
            DKIMError::DnsBogus("bad sig".to_string()).status(),
            Status::Tempfail
        );
        assert_eq!(
            DKIMError::InternalError("bug".to_string()).status(),
            Status::Tempfail
        );
    }

    #[test]
    fn stable_error_types() {
        assert_eq!(
            DKIMError::SignatureMissingRequiredTag("v").error_type(),
            "DKIM_SIGERROR_MISSING_V"
        );
        assert_eq!(
            DKIMError::BodyHashDidNotVerify.error_type(),
            "DKIM_SIGERROR_CORRUPT_BH"
        );
        assert_eq!(
            DKIMError::PolicyWrongSdid {
                got: "a.com".to_string(),
                expected: vec!["b.com".to_string()],
            }
            .error_type(),
            "DKIM_POLICYERROR_WRONG_SDID"
        );
    }
}
