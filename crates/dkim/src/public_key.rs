use crate::key::{DkimKeyRecord, KeyType};
use crate::DKIMError;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs1, pkcs8, RsaPublicKey};

#[derive(Debug)]
pub enum DkimPublicKey {
    Rsa(RsaPublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl DkimPublicKey {
    /// Decode the key material carried in a key record. RSA keys are
    /// X.509 SubjectPublicKeyInfo, with a bare PKCS#1 RSAPublicKey
    /// fallback for records published without the SPKI wrapper; ed25519
    /// keys are the raw 32 bytes.
    pub fn from_record(record: &DkimKeyRecord) -> Result<Self, DKIMError> {
        let bytes = &record.public_key_data;
        match record.key_type {
            KeyType::Rsa => Ok(Self::Rsa(
                pkcs8::DecodePublicKey::from_public_key_der(bytes)
                    .or_else(|_| pkcs1::DecodeRsaPublicKey::from_pkcs1_der(bytes))
                    .map_err(|err| {
                        DKIMError::KeyDecode(format!("failed to parse RSA public key: {err}"))
                    })?,
            )),
            KeyType::Ed25519 => {
                let bytes: &[u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    DKIMError::KeyDecode(format!(
                        "ed25519 keys are 32 bytes, have {}",
                        bytes.len()
                    ))
                })?;
                Ok(Self::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(bytes).map_err(|err| {
                        DKIMError::KeyDecode(format!("invalid ed25519 public key: {err}"))
                    })?,
                ))
            }
        }
    }

    /// Key strength in bits; used for the weak RSA key policy
    pub fn bits(&self) -> usize {
        match self {
            Self::Rsa(key) => key.n().bits(),
            Self::Ed25519(_) => 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024 bit SPKI key from RFC 6376 appendix C
    const RSA_SPKI: &str = "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDwIRP/UC3SBsEmGqZ9ZJW3/DkMoGeLnQg1fWn7/zYtIxN2SnFCjxOCKG9v3b4jYfcTNh5ijSsq631uBItLa7od+v/RtdC2UzJ1lWT947qR+Rcac2gbto/NMqJ0fzfVjH4OuKhitdY9tf6mcwGjaNBcWToIMmPSPDdQPNUYckcQ2QIDAQAB";
    // ed25519 key from RFC 8463
    const ED25519: &str = "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

    #[test]
    fn decode_rsa_spki() {
        let record = DkimKeyRecord::parse(&format!("v=DKIM1; k=rsa; p={RSA_SPKI}")).unwrap();
        let key = DkimPublicKey::from_record(&record).unwrap();
        assert_eq!(key.bits(), 1024);
    }

    #[test]
    fn decode_ed25519() {
        let record =
            DkimKeyRecord::parse(&format!("v=DKIM1; k=ed25519; p={ED25519}")).unwrap();
        let key = DkimPublicKey::from_record(&record).unwrap();
        assert!(matches!(key, DkimPublicKey::Ed25519(_)));
        assert_eq!(key.bits(), 256);
    }

    #[test]
    fn reject_malformed_der() {
        let record = DkimKeyRecord::parse("v=DKIM1; k=rsa; p=aGVsbG8=").unwrap();
        assert!(matches!(
            DkimPublicKey::from_record(&record),
            Err(DKIMError::KeyDecode(_))
        ));
    }

    #[test]
    fn reject_wrong_length_ed25519() {
        let record = DkimKeyRecord::parse("v=DKIM1; k=ed25519; p=aGVsbG8=").unwrap();
        assert!(matches!(
            DkimPublicKey::from_record(&record),
            Err(DKIMError::KeyDecode(_))
        ));
    }
}
