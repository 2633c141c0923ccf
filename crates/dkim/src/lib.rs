// Verification side of DKIM: https://datatracker.ietf.org/doc/html/rfc6376

pub mod canonicalization;
mod errors;
mod hash;
mod key;
mod parser;
mod public_key;
mod result;
mod signature;
mod verify;

pub use errors::{DKIMError, Status};
pub use key::{DkimKeyRecord, KeyType};
pub use parser::{tag_list as parse_tag_list, Tag};
pub use public_key::DkimPublicKey;
pub use result::{sort_results, SignatureResult, SignatureWarning, Verdict, VerifiedBy};
pub use signature::{DkimSignature, HashAlgorithm, SignatureAlgorithm};
pub use verify::{
    dkim_key_name, verify_message, verify_signature_header, DnsKeySource, KeySource,
    RetrievedKey, TreatAs, UnsignedHeadersMode, VerifyOptions, DKIM_SIGNATURE_HEADER_NAME,
};
