use crate::canonicalization::Type;
use crate::signature::HashAlgorithm;
use crate::DKIMError;
use data_encoding::BASE64;
use mailparsing::{Header, HeaderMap};
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::collections::HashMap;

pub(crate) enum HashImpl {
    Sha1(Sha1),
    Sha256(Sha256),
    #[cfg(test)]
    Copy(Vec<u8>),
}

impl HashImpl {
    pub fn from_algo(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    #[cfg(test)]
    pub fn copy_data() -> Self {
        Self::Copy(vec![])
    }

    pub fn hash(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
            #[cfg(test)]
            Self::Copy(data) => data.extend_from_slice(bytes),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Self::Sha1(hasher) => BASE64.encode(&hasher.finalize()),
            Self::Sha256(hasher) => BASE64.encode(&hasher.finalize()),
            #[cfg(test)]
            Self::Copy(data) => String::from_utf8_lossy(&data).into(),
        }
    }

    pub fn finalize_bytes(self) -> Vec<u8> {
        match self {
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            #[cfg(test)]
            Self::Copy(data) => data,
        }
    }
}

/// Streams canonicalized body bytes into a hash, stopping at `limit`
/// while still counting how many bytes the canonical body offered.
pub(crate) struct LimitHasher {
    pub limit: usize,
    pub hashed: usize,
    /// total canonical bytes presented, regardless of the limit
    pub offered: usize,
    pub hasher: HashImpl,
}

impl LimitHasher {
    pub fn hash(&mut self, bytes: &[u8]) {
        self.offered += bytes.len();
        let remain = self.limit - self.hashed;
        let len = bytes.len().min(remain);
        self.hasher.hash(&bytes[..len]);
        self.hashed += len;
    }

    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }

    #[cfg(test)]
    pub fn finalize_bytes(self) -> Vec<u8> {
        self.hasher.finalize_bytes()
    }
}

#[derive(Debug)]
pub(crate) struct BodyHash {
    /// base64 of the digest
    pub hash: String,
    /// true when an l= tag cut the canonical body short
    pub truncated: bool,
}

/// Hash of the canonicalized message body, honoring the l= length tag.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.7>
pub(crate) fn compute_body_hash(
    canonicalization: Type,
    length: Option<u64>,
    algo: HashAlgorithm,
    body: &[u8],
) -> Result<BodyHash, DKIMError> {
    let limit = match length {
        Some(l) => usize::try_from(l).map_err(|_| DKIMError::TooLargeL)?,
        None => usize::MAX,
    };

    let mut hasher = LimitHasher {
        hasher: HashImpl::from_algo(algo),
        limit,
        hashed: 0,
        offered: 0,
    };

    canonicalization.canon_body(body, &mut hasher);

    let truncated = match length {
        Some(_) => {
            if limit > hasher.offered {
                return Err(DKIMError::TooLargeL);
            }
            limit < hasher.offered
        }
        None => false,
    };

    Ok(BodyHash {
        hash: hasher.finalize(),
        truncated,
    })
}

/// Select the message headers covered by the signature, in signature
/// order. Each name in the h= list consumes one instance of that header,
/// scanning from the bottom of the message upward; names with no
/// remaining instance contribute nothing.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-5.4.2>
fn select_headers<'a, 'b>(
    signed_headers: &[String],
    headers: &'b HeaderMap<'a>,
) -> Vec<&'b Header<'a>> {
    let num_headers = headers.len();
    let mut last_index: HashMap<&str, usize> = HashMap::new();
    let mut selected = vec![];

    'outer: for name in signed_headers {
        let index = *last_index.get(name.as_str()).unwrap_or(&num_headers);
        for (header_index, header) in headers
            .iter()
            .enumerate()
            .rev()
            .skip(num_headers - index)
        {
            if header.get_name().eq_ignore_ascii_case(name) {
                selected.push(header);
                last_index.insert(name, header_index);
                continue 'outer;
            }
        }
        last_index.insert(name, 0);
    }

    selected
}

/// Compute the header hash input and digest it: the selected headers,
/// then the DKIM-Signature header itself with the b= value emptied and
/// its trailing CRLF stripped.
pub(crate) fn compute_headers_hash(
    canonicalization: Type,
    signed_headers: &[String],
    algo: HashAlgorithm,
    signature_header: &Header,
    raw_b: &str,
    headers: &HeaderMap,
) -> Result<Vec<u8>, DKIMError> {
    let mut input = Vec::new();

    for header in select_headers(signed_headers, headers) {
        canonicalization.canon_header_into(
            header.get_name(),
            header.get_separator(),
            header.get_raw_value(),
            &mut input,
        );
    }

    let value = if raw_b.is_empty() {
        signature_header.get_raw_value().to_string()
    } else {
        signature_header.get_raw_value().replace(raw_b, "")
    };
    let mut own_header = Vec::new();
    canonicalization.canon_header_into(
        signature_header.get_name(),
        signature_header.get_separator(),
        &value,
        &mut own_header,
    );
    if !own_header.ends_with(b"\r\n") {
        tracing::error!("canonicalized signature header lost its line ending");
        return Err(DKIMError::InternalError(
            "canonicalized signature header lost its line ending".to_string(),
        ));
    }
    own_header.truncate(own_header.len() - 2);
    input.extend_from_slice(&own_header);

    tracing::debug!("headers to hash: {:?}", String::from_utf8_lossy(&input));

    let mut hasher = HashImpl::from_algo(algo);
    hasher.hash(&input);
    Ok(hasher.finalize_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailparsing::Message;

    fn parse(msg: &str) -> Message {
        Message::parse(msg.replace('\n', "\r\n")).unwrap()
    }

    #[test]
    fn test_compute_body_hash_simple() {
        let email = parse("To: test@example.com\nSubject: subject\n\nHello Alice\n");
        assert_eq!(
            compute_body_hash(Type::Simple, None, HashAlgorithm::Sha1, email.body().as_bytes())
                .unwrap()
                .hash,
            "QKvft7OqaNbRT/nH0Qmc/7mSK7w="
        );
        assert_eq!(
            compute_body_hash(
                Type::Simple,
                None,
                HashAlgorithm::Sha256,
                email.body().as_bytes()
            )
            .unwrap()
            .hash,
            "+kuxulZ7MkxvrZj1LNFkEtOUvi0M2/80KBPP0duHSfw="
        );
    }

    #[test]
    fn test_compute_body_hash_relaxed() {
        // trailing whitespace and interior runs collapse to the same bytes
        let email = parse("To: test@example.com\n\nHello  Alice \n");
        assert_eq!(
            compute_body_hash(
                Type::Relaxed,
                None,
                HashAlgorithm::Sha256,
                email.body().as_bytes()
            )
            .unwrap()
            .hash,
            "+kuxulZ7MkxvrZj1LNFkEtOUvi0M2/80KBPP0duHSfw="
        );
    }

    #[test]
    fn test_compute_body_hash_length() {
        let email = parse("To: test@example.com\n\nHello Alice\n");
        let hash = compute_body_hash(
            Type::Relaxed,
            Some(3),
            HashAlgorithm::Sha256,
            email.body().as_bytes(),
        )
        .unwrap();
        assert!(hash.truncated);
        assert_eq!(hash.hash, "t4nCTc22jEQ3sEwYa/I5pyB+dXP7GyKnSf4ae42W0pI=");
    }

    #[test]
    fn test_compute_body_hash_too_large_length() {
        let email = parse("To: test@example.com\n\nHello Alice\n");
        assert_eq!(
            compute_body_hash(
                Type::Relaxed,
                Some(10_000),
                HashAlgorithm::Sha256,
                email.body().as_bytes()
            )
            .unwrap_err(),
            DKIMError::TooLargeL
        );
        // an exact match is neither truncation nor error
        let exact = compute_body_hash(
            Type::Relaxed,
            Some("Hello Alice\r\n".len() as u64),
            HashAlgorithm::Sha256,
            email.body().as_bytes(),
        )
        .unwrap();
        assert!(!exact.truncated);
    }

    #[test]
    fn test_compute_body_hash_empty_simple() {
        let email = parse("Subject: nothing\n\n");
        assert_eq!(
            compute_body_hash(Type::Simple, None, HashAlgorithm::Sha1, email.body().as_bytes())
                .unwrap()
                .hash,
            "uoq1oCgLlTqpdDX/iUbLy7J1Wic="
        );
        assert_eq!(
            compute_body_hash(
                Type::Simple,
                None,
                HashAlgorithm::Sha256,
                email.body().as_bytes()
            )
            .unwrap()
            .hash,
            "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY="
        );
    }

    #[test]
    fn test_compute_body_hash_empty_relaxed() {
        let email = parse("Subject: nothing\n\n");
        assert_eq!(
            compute_body_hash(
                Type::Relaxed,
                None,
                HashAlgorithm::Sha1,
                email.body().as_bytes()
            )
            .unwrap()
            .hash,
            "2jmj7l5rSw0yVb/vlWAYkK/YBwk="
        );
        assert_eq!(
            compute_body_hash(
                Type::Relaxed,
                None,
                HashAlgorithm::Sha256,
                email.body().as_bytes()
            )
            .unwrap()
            .hash,
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_select_headers() {
        let signed: Vec<String> = ["from", "subject", "to", "from"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let email = parse("from: biz\nfoo: bar\nfrom: baz\nsubject: boring\n\ntest");
        let selected: Vec<&str> = select_headers(&signed, email.headers())
            .into_iter()
            .map(|h| h.get_raw_value())
            .collect();
        assert_eq!(selected, vec!["baz", "boring", "biz"]);

        let email = parse("From: biz\nFoo: bar\nSubject: Boring\n\ntest");
        let selected: Vec<&str> = select_headers(&signed, email.headers())
            .into_iter()
            .map(|h| h.get_raw_value())
            .collect();
        assert_eq!(selected, vec!["biz", "Boring"]);
    }
}
