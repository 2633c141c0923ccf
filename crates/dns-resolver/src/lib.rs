//! The DNS contract used by the verification engine: TXT queries that
//! surface the response code and the DNSSEC validation state alongside the
//! record data. Two implementors ship here: a stub resolver backed by
//! hickory (no DNSSEC, `secure` always false) and an in-memory resolver
//! for tests. A validating resolver is just another implementor of
//! [`Resolver`].

use async_trait::async_trait;
use hickory_proto::ProtoErrorKind;
use hickory_resolver::proto::op::response_code::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::{Name, ResolveError, TokioResolver};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The answer to a TXT query. `records` holds one string per TXT record,
/// each the concatenation of that record's character-strings.
#[derive(Debug, Clone)]
pub struct TxtAnswer {
    pub rcode: ResponseCode,
    pub records: Vec<String>,
    pub secure: bool,
    pub bogus: bool,
    pub why_bogus: Option<String>,
}

impl TxtAnswer {
    pub fn nxdomain(&self) -> bool {
        self.rcode == ResponseCode::NXDomain
    }

    /// true when the server answered (NoError or NXDomain) as opposed to
    /// failing the query
    pub fn is_authoritative_answer(&self) -> bool {
        matches!(self.rcode, ResponseCode::NoError | ResponseCode::NXDomain)
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DnsError {
    #[error("invalid DNS name: {0}")]
    InvalidName(String),
    #[error("DNS: {0}")]
    ResolveFailed(String),
}

impl DnsError {
    fn from_resolve(name: &impl fmt::Display, err: ResolveError) -> Self {
        DnsError::ResolveFailed(format!("failed to query DNS for {name}: {err}"))
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_txt(&self, name: &str) -> Result<TxtAnswer, DnsError>;
}

/// Stub resolver over the hickory tokio runtime and the system resolver
/// configuration. It performs no DNSSEC validation, so `secure` is always
/// false and `bogus` never set.
pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Result<Self, hickory_resolver::ResolveError> {
        Ok(Self {
            inner: TokioResolver::builder_tokio()?.build(),
        })
    }
}

impl From<TokioResolver> for HickoryResolver {
    fn from(inner: TokioResolver) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn resolve_txt(&self, name: &str) -> Result<TxtAnswer, DnsError> {
        let name = Name::from_utf8(name)
            .map_err(|err| DnsError::InvalidName(format!("invalid name {name}: {err}")))?;

        match self.inner.lookup(name.clone(), RecordType::TXT).await {
            Ok(result) => {
                let mut records = vec![];
                for rdata in result.iter() {
                    if let Some(txt) = rdata.as_txt() {
                        let mut joined = String::new();
                        for segment in txt.iter() {
                            joined.push_str(&String::from_utf8_lossy(segment));
                        }
                        records.push(joined);
                    }
                }
                tracing::debug!("TXT {name} -> {records:?}");
                Ok(TxtAnswer {
                    rcode: ResponseCode::NoError,
                    records,
                    secure: false,
                    bogus: false,
                    why_bogus: None,
                })
            }
            Err(err) => match err.proto().map(|err| err.kind()) {
                Some(ProtoErrorKind::NoRecordsFound { response_code, .. }) => Ok(TxtAnswer {
                    rcode: *response_code,
                    records: vec![],
                    secure: false,
                    bogus: false,
                    why_bogus: None,
                }),
                _ => Err(DnsError::from_resolve(&name, err)),
            },
        }
    }
}

enum TestAnswer {
    Records { records: Vec<String>, secure: bool },
    Empty,
    NxDomain,
    ServFail,
    Bogus(String),
}

/// In-memory resolver for tests. Unknown names answer NXDomain.
#[derive(Default)]
pub struct TestResolver {
    zones: BTreeMap<String, TestAnswer>,
}

fn canonical_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl TestResolver {
    pub fn with_txt(self, name: &str, value: impl Into<String>) -> Self {
        self.with_txt_multiple(name, vec![value.into()])
    }

    /// Add multiple separate TXT records for the specified name
    pub fn with_txt_multiple(mut self, name: &str, records: Vec<String>) -> Self {
        self.zones.insert(
            canonical_name(name),
            TestAnswer::Records {
                records,
                secure: false,
            },
        );
        self
    }

    /// Like `with_txt`, but the answer reports DNSSEC-validated data
    pub fn with_secure_txt(mut self, name: &str, value: impl Into<String>) -> Self {
        self.zones.insert(
            canonical_name(name),
            TestAnswer::Records {
                records: vec![value.into()],
                secure: true,
            },
        );
        self
    }

    /// The name exists but has no TXT records (NoError, empty answer)
    pub fn with_empty(mut self, name: &str) -> Self {
        self.zones.insert(canonical_name(name), TestAnswer::Empty);
        self
    }

    pub fn with_nxdomain(mut self, name: &str) -> Self {
        self.zones.insert(canonical_name(name), TestAnswer::NxDomain);
        self
    }

    pub fn with_servfail(mut self, name: &str) -> Self {
        self.zones.insert(canonical_name(name), TestAnswer::ServFail);
        self
    }

    /// DNSSEC validation failure for this name
    pub fn with_bogus(mut self, name: &str, why: impl Into<String>) -> Self {
        self.zones
            .insert(canonical_name(name), TestAnswer::Bogus(why.into()));
        self
    }
}

#[async_trait]
impl Resolver for TestResolver {
    async fn resolve_txt(&self, name: &str) -> Result<TxtAnswer, DnsError> {
        let answer = match self.zones.get(&canonical_name(name)) {
            Some(answer) => answer,
            None => &TestAnswer::NxDomain,
        };
        Ok(match answer {
            TestAnswer::Records { records, secure } => TxtAnswer {
                rcode: ResponseCode::NoError,
                records: records.clone(),
                secure: *secure,
                bogus: false,
                why_bogus: None,
            },
            TestAnswer::Empty => TxtAnswer {
                rcode: ResponseCode::NoError,
                records: vec![],
                secure: false,
                bogus: false,
                why_bogus: None,
            },
            TestAnswer::NxDomain => TxtAnswer {
                rcode: ResponseCode::NXDomain,
                records: vec![],
                secure: false,
                bogus: false,
                why_bogus: None,
            },
            TestAnswer::ServFail => TxtAnswer {
                rcode: ResponseCode::ServFail,
                records: vec![],
                secure: false,
                bogus: false,
                why_bogus: None,
            },
            TestAnswer::Bogus(why) => TxtAnswer {
                rcode: ResponseCode::ServFail,
                records: vec![],
                secure: false,
                bogus: true,
                why_bogus: Some(why.clone()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolver_answers() {
        let resolver = TestResolver::default()
            .with_txt("one.example.com", "hello")
            .with_txt_multiple(
                "two.example.com",
                vec!["first".to_string(), "second".to_string()],
            )
            .with_empty("empty.example.com")
            .with_servfail("broken.example.com")
            .with_bogus("evil.example.com", "signature expired");

        let answer = resolver.resolve_txt("one.example.com").await.unwrap();
        assert_eq!(answer.records, vec!["hello"]);
        assert!(!answer.nxdomain());

        let answer = resolver.resolve_txt("Two.Example.Com.").await.unwrap();
        assert_eq!(answer.records.len(), 2);

        let answer = resolver.resolve_txt("empty.example.com").await.unwrap();
        assert!(answer.records.is_empty());
        assert_eq!(answer.rcode, ResponseCode::NoError);

        let answer = resolver.resolve_txt("missing.example.com").await.unwrap();
        assert!(answer.nxdomain());

        let answer = resolver.resolve_txt("broken.example.com").await.unwrap();
        assert!(!answer.is_authoritative_answer());
        assert!(!answer.bogus);

        let answer = resolver.resolve_txt("evil.example.com").await.unwrap();
        assert!(answer.bogus);
        assert_eq!(answer.why_bogus.as_deref(), Some("signature expired"));
    }
}
