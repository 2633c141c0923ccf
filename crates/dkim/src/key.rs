use crate::parser::TagMap;
use crate::signature::{HashAlgorithm, SignatureAlgorithm};
use crate::DKIMError;
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl KeyType {
    pub fn matches(&self, algorithm: SignatureAlgorithm) -> bool {
        matches!(
            (self, algorithm),
            (Self::Rsa, SignatureAlgorithm::Rsa) | (Self::Ed25519, SignatureAlgorithm::Ed25519)
        )
    }
}

/// A parsed `<selector>._domainkey.<sdid>` TXT record.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.6.1>
#[derive(Debug, Clone, PartialEq)]
pub struct DkimKeyRecord {
    pub key_type: KeyType,
    /// h= acceptable hash algorithms; empty means any
    pub hash_algorithms: Vec<HashAlgorithm>,
    /// decoded p= bytes
    pub public_key_data: Vec<u8>,
    /// t=y: this domain is testing DKIM; verifiers treat failures as if
    /// the message were unsigned
    pub testmode: bool,
    /// t=s: the AUID domain must equal the SDID exactly
    pub strict_auid: bool,
    /// the TXT RDATA as retrieved, for cache comparison
    pub raw: String,
}

impl DkimKeyRecord {
    pub fn parse(txt: &str) -> Result<Self, DKIMError> {
        let tags = TagMap::from_key_record(txt)?;

        // v= is optional but fixed when present
        if let Some(version) = tags.get("v") {
            if version != "DKIM1" {
                return Err(DKIMError::KeyIncompatibleVersion);
            }
        }

        let key_type = match tags.get("k") {
            None | Some("rsa") => KeyType::Rsa,
            Some("ed25519") => KeyType::Ed25519,
            Some(other) => return Err(DKIMError::KeyUnknownType(other.to_owned())),
        };

        // unrecognized hash algorithms are ignored, not an error
        let mut hash_algorithms = vec![];
        if let Some(h) = tags.get("h") {
            for algo in h.split(':') {
                match algo {
                    "sha1" => hash_algorithms.push(HashAlgorithm::Sha1),
                    "sha256" => hash_algorithms.push(HashAlgorithm::Sha256),
                    other => tracing::debug!("ignoring unknown key hash algorithm {other}"),
                }
            }
        }

        let p = tags.get("p").ok_or(DKIMError::KeyMissingP)?;
        if p.is_empty() {
            return Err(DKIMError::KeyRevoked);
        }
        let public_key_data = BASE64
            .decode(p.as_bytes())
            .map_err(|err| DKIMError::KeyDecode(format!("invalid base64: {err}")))?;

        if let Some(service_types) = tags.get("s") {
            if !service_types.split(':').any(|s| s == "*" || s == "email") {
                return Err(DKIMError::KeyNotEmailKey);
            }
        }

        let mut testmode = false;
        let mut strict_auid = false;
        if let Some(flags) = tags.get("t") {
            for flag in flags.split(':') {
                match flag {
                    "y" => testmode = true,
                    "s" => strict_auid = true,
                    other => tracing::debug!("ignoring unknown key flag {other}"),
                }
            }
        }

        Ok(Self {
            key_type,
            hash_algorithms,
            public_key_data,
            testmode,
            strict_auid,
            raw: txt.to_owned(),
        })
    }

    /// Whether the record permits the signature's hash algorithm
    pub fn allows_hash(&self, algo: HashAlgorithm) -> bool {
        self.hash_algorithms.is_empty() || self.hash_algorithms.contains(&algo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_B64: &str = "MHcCAQEEIQDnVgIC4HZ6AIMs0q0sR9gjkAthqn7ZJtGi9mDZT0dKw6A=";

    #[test]
    fn minimal_record() {
        let record = DkimKeyRecord::parse(&format!("p={KEY_B64}")).unwrap();
        assert_eq!(record.key_type, KeyType::Rsa);
        assert!(record.hash_algorithms.is_empty());
        assert!(record.allows_hash(HashAlgorithm::Sha1));
        assert!(!record.testmode);
        assert!(!record.strict_auid);
    }

    #[test]
    fn version_must_be_dkim1() {
        assert!(DkimKeyRecord::parse(&format!("v=DKIM1; p={KEY_B64}")).is_ok());
        assert_eq!(
            DkimKeyRecord::parse(&format!("v=DKIM6; p={KEY_B64}")).unwrap_err(),
            DKIMError::KeyIncompatibleVersion
        );
    }

    #[test]
    fn key_types() {
        let record =
            DkimKeyRecord::parse(&format!("v=DKIM1; k=ed25519; p={KEY_B64}")).unwrap();
        assert_eq!(record.key_type, KeyType::Ed25519);
        assert!(record.key_type.matches(SignatureAlgorithm::Ed25519));
        assert!(!record.key_type.matches(SignatureAlgorithm::Rsa));

        assert_eq!(
            DkimKeyRecord::parse(&format!("v=DKIM1; k=foo; p={KEY_B64}")).unwrap_err(),
            DKIMError::KeyUnknownType("foo".to_owned())
        );
    }

    #[test]
    fn hash_restriction() {
        let record = DkimKeyRecord::parse(&format!("h=sha256; p={KEY_B64}")).unwrap();
        assert!(record.allows_hash(HashAlgorithm::Sha256));
        assert!(!record.allows_hash(HashAlgorithm::Sha1));

        // unknown entries in h= are dropped
        let record = DkimKeyRecord::parse(&format!("h=sha256:sha512; p={KEY_B64}")).unwrap();
        assert_eq!(record.hash_algorithms, vec![HashAlgorithm::Sha256]);
    }

    #[test]
    fn revoked_and_missing_key() {
        assert_eq!(
            DkimKeyRecord::parse("v=DKIM1; p=").unwrap_err(),
            DKIMError::KeyRevoked
        );
        assert_eq!(
            DkimKeyRecord::parse("v=DKIM1; k=rsa").unwrap_err(),
            DKIMError::KeyMissingP
        );
    }

    #[test]
    fn service_types() {
        assert!(DkimKeyRecord::parse(&format!("s=email; p={KEY_B64}")).is_ok());
        assert!(DkimKeyRecord::parse(&format!("s=*; p={KEY_B64}")).is_ok());
        assert!(DkimKeyRecord::parse(&format!("s=other:email; p={KEY_B64}")).is_ok());
        assert_eq!(
            DkimKeyRecord::parse(&format!("s=tlsa; p={KEY_B64}")).unwrap_err(),
            DKIMError::KeyNotEmailKey
        );
    }

    #[test]
    fn flags() {
        let record = DkimKeyRecord::parse(&format!("t=y; p={KEY_B64}")).unwrap();
        assert!(record.testmode);
        assert!(!record.strict_auid);

        let record = DkimKeyRecord::parse(&format!("t=y:s; p={KEY_B64}")).unwrap();
        assert!(record.testmode);
        assert!(record.strict_auid);
    }

    #[test]
    fn duplicate_tags_rejected() {
        assert_eq!(
            DkimKeyRecord::parse(&format!("k=rsa; k=rsa; p={KEY_B64}")).unwrap_err(),
            DKIMError::KeyDuplicateTag("k".to_owned())
        );
    }
}
