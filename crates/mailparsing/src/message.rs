use crate::header::Header;
use crate::headermap::HeaderMap;
use crate::normalize::{has_lone_cr_or_lf, normalize_crlf};
use crate::rfc5322::AddrSpec;
use crate::{HeaderConformance, MailParsingError, Result, SharedString};

/// An immutable parsed message: the ordered header block and the body.
/// End of line sequences are normalized to CRLF up front; everything after
/// the first empty line is the body. Header fields keep their original
/// bytes, folds included.
#[derive(Debug)]
pub struct Message<'a> {
    bytes: SharedString<'a>,
    headers: HeaderMap<'a>,
    body_offset: usize,
    overall_conformance: HeaderConformance,
}

impl<'a> Message<'a> {
    pub fn parse<S: Into<SharedString<'a>>>(input: S) -> Result<Self> {
        let bytes: SharedString = input.into();
        let bytes = if has_lone_cr_or_lf(bytes.as_str().as_bytes()) {
            SharedString::from(normalize_crlf(bytes.as_str()))
        } else {
            bytes
        };

        let has_boundary =
            memchr::memmem::find(bytes.as_str().as_bytes(), b"\r\n\r\n").is_some();
        if !has_boundary && !bytes.is_empty() && !bytes.as_str().ends_with("\r\n") {
            return Err(MailParsingError::MalformedMessage(
                "no header/body boundary and the final line is unterminated".to_string(),
            ));
        }

        let parsed = Header::parse_headers(bytes.clone())?;
        if !parsed.overall_conformance.is_empty() {
            tracing::debug!(
                "message has conformance issues: {:?}",
                parsed.overall_conformance
            );
        }
        Ok(Self {
            headers: parsed.headers,
            body_offset: parsed.body_offset,
            overall_conformance: parsed.overall_conformance,
            bytes,
        })
    }

    pub fn headers(&self) -> &HeaderMap<'a> {
        &self.headers
    }

    pub fn header_conformance(&self) -> HeaderConformance {
        self.overall_conformance
    }

    /// The body octets following the first empty line; empty for a
    /// headers-only message.
    pub fn body(&self) -> SharedString<'a> {
        self.bytes.slice(self.body_offset..self.bytes.len())
    }

    /// The single address in the From header. Zero From headers, an
    /// unparseable one, or more than one mailbox are all fatal: there is
    /// no sensible author identity to evaluate policies against.
    pub fn from_address(&self) -> Result<AddrSpec> {
        let header = self
            .headers
            .get_first("From")
            .ok_or_else(|| MailParsingError::MissingHeader("From".to_string()))?;
        let list = header.as_mailbox_list()?;
        match list.0.as_slice() {
            [mailbox] => Ok(mailbox.address.clone()),
            boxes => Err(MailParsingError::FromExtraction(format!(
                "expected exactly one From mailbox, found {}",
                boxes.len()
            ))),
        }
    }

    /// The contents of the List-Id header's angle brackets, if present.
    pub fn list_id(&self) -> Option<String> {
        let header = self.headers.get_first("List-Id")?;
        let value = header.unfolded_value();
        let start = value.rfind('<')?;
        let end = value[start..].find('>')? + start;
        Some(value[start + 1..end].trim().to_string())
    }
}
