use crate::authres::{AuthenticationResults, ParseMode};
use crate::headermap::HeaderMap;
use crate::rfc5322::MailboxList;
use crate::{MailParsingError, Result, SharedString};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct HeaderConformance: u8 {
        const NON_CANONICAL_LINE_ENDINGS = 0b0000_0001;
        const NAME_ENDS_WITH_SPACE = 0b0000_0010;
        const LINE_TOO_LONG = 0b0000_0100;
    }
}

/// A single header field, preserving the original bytes of the name, the
/// separator and the (possibly folded) value. `raw_field` reconstructs the
/// field exactly as it appeared in the message, which the simple header
/// canonicalization relies upon.
#[derive(Clone, Debug, PartialEq)]
pub struct Header<'a> {
    name: SharedString<'a>,
    /// The colon and any whitespace around it
    separator: SharedString<'a>,
    /// Everything after the separator up to, but not including, the final
    /// CRLF. Interior folding CRLFs are preserved verbatim.
    value: SharedString<'a>,
    conformance: HeaderConformance,
}

/// Holds the result of parsing a block of headers
#[derive(Debug)]
pub struct HeaderParseResult<'a> {
    pub headers: HeaderMap<'a>,
    pub body_offset: usize,
    pub overall_conformance: HeaderConformance,
}

fn is_header_name_char(b: u8) -> bool {
    // field names are printable US-ASCII except the colon: [!-9;-~]
    (0x21..=0x39).contains(&b) || (0x3b..=0x7e).contains(&b)
}

impl<'a> Header<'a> {
    pub fn with_name_value<N: Into<SharedString<'a>>, V: Into<SharedString<'a>>>(
        name: N,
        value: V,
    ) -> Self {
        Self {
            name: name.into(),
            separator: ": ".into(),
            value: value.into(),
            conformance: HeaderConformance::default(),
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_raw_value(&self) -> &str {
        &self.value
    }

    /// The original bytes between the name and the value: the colon and
    /// any whitespace around it
    pub fn get_separator(&self) -> &str {
        &self.separator
    }

    pub fn conformance(&self) -> HeaderConformance {
        self.conformance
    }

    /// The header field exactly as it appeared in the message, without the
    /// trailing CRLF.
    pub fn raw_field(&self) -> String {
        format!("{}{}{}", self.name, self.separator, self.value)
    }

    /// The value with folding CRLFs removed. Folding whitespace itself is
    /// retained; only the line breaks are deleted.
    pub fn unfolded_value(&self) -> String {
        self.value.replace("\r\n", "")
    }

    pub fn as_mailbox_list(&self) -> Result<MailboxList> {
        crate::rfc5322::parse_mailbox_list(self.get_raw_value()).map_err(|error| {
            MailParsingError::InvalidHeaderValue {
                header_name: self.name.to_string(),
                error: Box::new(error),
            }
        })
    }

    pub fn as_authentication_results(&self, mode: ParseMode) -> Result<AuthenticationResults> {
        crate::authres::parse_header_value(&self.unfolded_value(), mode).map_err(|error| {
            MailParsingError::InvalidHeaderValue {
                header_name: self.name.to_string(),
                error: Box::new(error),
            }
        })
    }

    /// Parse a block of headers. Stops at the CRLF CRLF boundary, if any;
    /// `body_offset` is the index just beyond it (or the end of the input
    /// for a headers-only block).
    pub fn parse_headers(header_block: SharedString<'a>) -> Result<HeaderParseResult<'a>> {
        let mut headers = vec![];
        let mut overall_conformance = HeaderConformance::default();
        let mut idx = 0;

        while idx < header_block.len() {
            let b = header_block.as_str().as_bytes()[idx];
            if b == b'\r' {
                if header_block.as_str().as_bytes().get(idx + 1) == Some(&b'\n') {
                    // empty line: end of header block
                    idx += 2;
                    break;
                }
                return Err(MailParsingError::HeaderParse(
                    "lone CR in header block".to_string(),
                ));
            }
            if headers.is_empty() && b.is_ascii_whitespace() {
                return Err(MailParsingError::HeaderParse(
                    "header block must not start with whitespace".to_string(),
                ));
            }
            let (header, next) = Self::parse(header_block.slice(idx..header_block.len()))?;
            overall_conformance |= header.conformance;
            headers.push(header);
            idx += next;
        }
        Ok(HeaderParseResult {
            headers: HeaderMap::new(headers),
            body_offset: idx,
            overall_conformance,
        })
    }

    /// Parse a single header field from the start of `block`, returning the
    /// header and the offset of the byte following its final CRLF.
    pub fn parse(block: SharedString<'a>) -> Result<(Self, usize)> {
        let bytes = block.as_str().as_bytes();
        let mut conformance = HeaderConformance::default();

        let mut name_end = 0;
        while name_end < bytes.len() && is_header_name_char(bytes[name_end]) {
            name_end += 1;
        }
        if name_end == 0 {
            return Err(MailParsingError::HeaderParse(format!(
                "invalid header field name starting with byte {:?}",
                bytes[0] as char
            )));
        }

        // Tolerate whitespace between the name and the colon; it becomes
        // part of the separator so that raw_field reconstruction is exact.
        let mut sep_end = name_end;
        while sep_end < bytes.len() && (bytes[sep_end] == b' ' || bytes[sep_end] == b'\t') {
            sep_end += 1;
        }
        if sep_end > name_end {
            conformance.set(HeaderConformance::NAME_ENDS_WITH_SPACE, true);
        }
        if sep_end >= bytes.len() || bytes[sep_end] != b':' {
            return Err(MailParsingError::HeaderParse(format!(
                "header field name is not followed by a colon: {:?}",
                &block.as_str()[..name_end.min(48)]
            )));
        }
        sep_end += 1;
        if bytes.get(sep_end) == Some(&b' ') {
            sep_end += 1;
        }
        let value_start = sep_end;

        // The value runs to the first CRLF that is not followed by WSP
        let mut idx = value_start;
        let value_end;
        let next_offset;
        loop {
            match memchr::memchr(b'\r', &bytes[idx..]) {
                Some(cr) => {
                    let cr = idx + cr;
                    if bytes.get(cr + 1) != Some(&b'\n') {
                        return Err(MailParsingError::HeaderParse(
                            "lone CR in header value".to_string(),
                        ));
                    }
                    if cr - idx > 998 {
                        conformance.set(HeaderConformance::LINE_TOO_LONG, true);
                    }
                    match bytes.get(cr + 2) {
                        Some(b' ') | Some(b'\t') => {
                            // folded continuation line
                            idx = cr + 2;
                        }
                        _ => {
                            value_end = cr;
                            next_offset = cr + 2;
                            break;
                        }
                    }
                }
                None => {
                    // unterminated final line; the caller decides whether
                    // that is acceptable for the message as a whole
                    value_end = bytes.len();
                    next_offset = bytes.len();
                    break;
                }
            }
        }

        let header = Self {
            name: block.slice(0..name_end),
            separator: block.slice(name_end..value_start),
            value: block.slice(value_start..value_end),
            conformance,
        };
        Ok((header, next_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(s: &str) -> Header {
        let (header, _) = Header::parse(SharedString::Borrowed(s)).unwrap();
        header
    }

    #[test]
    fn simple_header() {
        let header = parse_one("Subject: hello\r\n");
        assert_eq!(header.get_name(), "Subject");
        assert_eq!(header.get_raw_value(), "hello");
        assert_eq!(header.raw_field(), "Subject: hello");
    }

    #[test]
    fn folded_header_preserves_raw_bytes() {
        let header = parse_one("Subject: hello\r\n\tworld\r\n");
        assert_eq!(header.get_raw_value(), "hello\r\n\tworld");
        assert_eq!(header.unfolded_value(), "hello\tworld");
    }

    #[test]
    fn no_space_after_colon() {
        let header = parse_one("X-Test:value\r\n");
        assert_eq!(header.get_raw_value(), "value");
        assert_eq!(header.raw_field(), "X-Test:value");
    }

    #[test]
    fn space_before_colon_is_part_of_separator() {
        let header = parse_one("Subject : x\r\n");
        assert_eq!(header.get_name(), "Subject");
        assert_eq!(header.get_raw_value(), "x");
        assert!(header
            .conformance()
            .contains(HeaderConformance::NAME_ENDS_WITH_SPACE));
        assert_eq!(header.raw_field(), "Subject : x");
    }

    #[test]
    fn invalid_name_is_fatal() {
        assert!(Header::parse(SharedString::Borrowed("Bad Name: x\r\n")).is_err());
        assert!(Header::parse(SharedString::Borrowed(": x\r\n")).is_err());
    }

    #[test]
    fn parse_block() {
        let block = "From: a@example.com\r\nTo: b@example.com\r\n\r\nbody";
        let result = Header::parse_headers(SharedString::Borrowed(block)).unwrap();
        assert_eq!(result.headers.len(), 2);
        assert_eq!(&block[result.body_offset..], "body");
    }

    #[test]
    fn parse_block_headers_only() {
        let block = "From: a@example.com\r\nTo: b@example.com\r\n";
        let result = Header::parse_headers(SharedString::Borrowed(block)).unwrap();
        assert_eq!(result.headers.len(), 2);
        assert_eq!(result.body_offset, block.len());
    }
}
